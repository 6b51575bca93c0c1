use std::{any::Any, sync::Arc};

use serde_json::Value as JsonValue;

use crate::core::{AppError, AppResult};

use super::{NamingCallback, NamingDirectory, NamingReference, NamingValue};

/// Binding capability shared by every naming-directory-like type.
pub trait NamingContext: Send + Sync {
    /// Identifier used in error messages, e.g. `app:global/shop`
    fn identifier(&self) -> &str;

    /// Binds a direct value. Fails if the name is already taken.
    fn bind(&self, name: &str, value: NamingValue, args: Vec<JsonValue>) -> AppResult<()>;

    /// Binds a deferred computation invoked on each search.
    fn bind_callback(
        &self,
        name: &str,
        callback: NamingCallback,
        args: Vec<JsonValue>,
    ) -> AppResult<()> {
        self.bind(name, Arc::new(callback), args)
    }

    /// Binds a name that resolves by searching for `target` instead.
    fn bind_reference(&self, name: &str, target: &str) -> AppResult<()> {
        self.bind(name, Arc::new(NamingReference::new(target)), Vec::new())
    }

    /// Resolves a name to a value, invoking callbacks and following
    /// references and subdirectories on the way.
    fn search(&self, name: &str, args: &[JsonValue]) -> AppResult<NamingValue>;

    fn search_as<T>(&self, name: &str, args: &[JsonValue]) -> AppResult<Arc<T>>
    where
        Self: Sized,
        T: Any + Send + Sync,
    {
        self.search(name, args)?
            .downcast::<T>()
            .map_err(|_| AppError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }
}

/// Entry point handed to components and valves.
///
/// Scheme-prefixed names are resolved from the root directory; bare names
/// go to the attached application subtree when there is one.
#[derive(Clone)]
pub struct InitialContext {
    root: Arc<NamingDirectory>,
    local: Option<Arc<NamingDirectory>>,
}

impl InitialContext {
    pub fn new(root: Arc<NamingDirectory>) -> Self {
        Self { root, local: None }
    }

    pub fn with_local(root: Arc<NamingDirectory>, local: Arc<NamingDirectory>) -> Self {
        Self {
            root,
            local: Some(local),
        }
    }

    pub fn root(&self) -> &Arc<NamingDirectory> {
        &self.root
    }

    /// Application subtree bare names resolve against, if attached
    pub fn local(&self) -> Option<&Arc<NamingDirectory>> {
        self.local.as_ref()
    }

    fn route(&self, name: &str) -> &NamingDirectory {
        match &self.local {
            Some(local) if !self.root.has_scheme(name) => local.as_ref(),
            _ => self.root.as_ref(),
        }
    }
}

impl NamingContext for InitialContext {
    fn identifier(&self) -> &str {
        match &self.local {
            Some(local) => local.identifier(),
            None => self.root.identifier(),
        }
    }

    fn bind(&self, name: &str, value: NamingValue, args: Vec<JsonValue>) -> AppResult<()> {
        self.route(name).bind(name, value, args)
    }

    fn search(&self, name: &str, args: &[JsonValue]) -> AppResult<NamingValue> {
        self.route(name).search(name, args)
    }
}
