//! Server-side request context
//!
//! Holds the server variables the hosting server resolved for a request
//! before handing it to a module, most importantly which handler owns it.

use std::collections::HashMap;

/// Variable naming the module responsible for the request
pub const SERVER_HANDLER: &str = "SERVER_HANDLER";
pub const SERVER_NAME: &str = "SERVER_NAME";
pub const SERVER_SOFTWARE: &str = "SERVER_SOFTWARE";
pub const REMOTE_ADDR: &str = "REMOTE_ADDR";

/// Server variables shared by every module hook of a request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    server_vars: HashMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context that routes the request to the given handler module
    pub fn for_handler(handler: &str) -> Self {
        let mut ctx = Self::new();
        ctx.set_server_var(SERVER_HANDLER, handler);
        ctx.set_server_var(
            SERVER_SOFTWARE,
            concat!("appsix/", env!("CARGO_PKG_VERSION")),
        );
        ctx
    }

    pub fn set_server_var(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.server_vars.insert(key.into(), value.into());
    }

    pub fn server_var(&self, key: &str) -> Option<&str> {
        self.server_vars.get(key).map(String::as_str)
    }

    pub fn has_server_var(&self, key: &str) -> bool {
        self.server_vars.contains_key(key)
    }

    pub fn server_vars(&self) -> &HashMap<String, String> {
        &self.server_vars
    }

    /// The module this request was routed to, if any
    pub fn handler(&self) -> Option<&str> {
        self.server_var(SERVER_HANDLER)
    }
}
