//! Request wrapper handed to valves
//!
//! Carries the decoded HTTP request plus per-request state: server
//! variables, typed scratch variables, the dispatched flag and the
//! application the request was matched to.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    sync::Arc,
    time::Instant,
};

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use uuid::Uuid;

use crate::application::Application;

pub struct ServletRequest {
    id: Uuid,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    received_at: Instant,
    server_vars: HashMap<String, String>,
    /// Custom variables available to valves (type-erased, thread-safe)
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
    dispatched: bool,
    context: Option<Arc<Application>>,
}

impl ServletRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            received_at: Instant::now(),
            server_vars: HashMap::new(),
            vars: HashMap::new(),
            dispatched: false,
            context: None,
        }
    }

    pub fn from_http_request(request: http::Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        let mut req = Self::new(parts.method, parts.uri);
        req.headers = parts.headers;
        req.body = body;
        req
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn inject_server_vars(&mut self, vars: HashMap<String, String>) {
        self.server_vars.extend(vars);
    }

    pub fn server_var(&self, key: &str) -> Option<&str> {
        self.server_vars.get(key).map(String::as_str)
    }

    /// Attach the application this request is dispatched to
    pub fn inject_context(&mut self, application: Arc<Application>) {
        self.context = Some(application);
    }

    pub fn context(&self) -> Option<&Arc<Application>> {
        self.context.as_ref()
    }

    pub fn set_dispatched(&mut self, dispatched: bool) {
        self.dispatched = dispatched;
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    /// Store a typed value into the request
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    /// Get a typed reference from the request
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a string slice if the stored value is a `String`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.vars.remove(key)
    }
}

impl fmt::Debug for ServletRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServletRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("dispatched", &self.dispatched)
            .field("context", &self.context.as_ref().map(|app| app.name()))
            .finish()
    }
}
