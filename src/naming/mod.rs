//! Hierarchical naming directory
//!
//! Names are slash-delimited paths, optionally carrying a scheme prefix
//! such as `app:`. Values, deferred callbacks, cross references and nested
//! directories can all be bound and are resolved through [`NamingContext::search`].

pub mod context;
pub mod directory;

use std::{any::Any, fmt, sync::Arc};

use serde_json::Value as JsonValue;

use crate::core::AppResult;

pub use context::{InitialContext, NamingContext};
pub use directory::{NamingDirectory, DEFAULT_SCHEME, MAX_RESOLUTION_DEPTH};

/// Anything that can be bound into a directory.
pub type NamingValue = Arc<dyn Any + Send + Sync>;

type CallbackFn = dyn Fn(&[JsonValue]) -> AppResult<NamingValue> + Send + Sync;

/// Deferred computation invoked on every successful search.
///
/// Arguments stored at bind time come first, call-time arguments are
/// appended after them.
#[derive(Clone)]
pub struct NamingCallback {
    inner: Arc<CallbackFn>,
}

impl NamingCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[JsonValue]) -> AppResult<NamingValue> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(callback),
        }
    }

    pub fn call(&self, args: &[JsonValue]) -> AppResult<NamingValue> {
        (self.inner)(args)
    }
}

impl fmt::Debug for NamingCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NamingCallback")
    }
}

/// Binding that re-runs a search for `target` on the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingReference {
    pub target: String,
}

impl NamingReference {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}
