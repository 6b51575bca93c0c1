//! Core traits for appsix components
//!
//! These interfaces decouple the dispatcher from the valves it runs and
//! the applications from the loaders they register.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use super::{error::AppResult, request::ServletRequest, response::ServletResponse};

/// A request interceptor in the servlet pipeline.
///
/// A valve that fully handles the request marks it dispatched, which skips
/// every valve after it.
#[async_trait]
pub trait Valve: Send + Sync {
    /// Name used in configuration and logs
    fn name(&self) -> &str;

    /// Handle the request, writing into the response
    async fn invoke(
        &self,
        request: &mut ServletRequest,
        response: &mut ServletResponse,
    ) -> AppResult<()>;
}

/// Constructor registered for each valve name
pub type ValveCreateFn = fn(JsonValue) -> AppResult<Arc<dyn Valve>>;

/// Makes application code available before the first request runs.
pub trait ClassLoader: Send + Sync {
    fn name(&self) -> &str;

    /// Called at most once per application, under its preparation lock
    fn register(&self, application: &str) -> AppResult<()>;
}
