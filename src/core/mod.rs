//! Core abstractions and interfaces for appsix
//!
//! This module provides the error type, the request and response wrappers
//! passed through valves, and the service container that replaces
//! process-wide singletons.

pub mod container;
pub mod context;
pub mod error;
pub mod registry;
pub mod request;
pub mod response;
pub mod traits;


// Re-export commonly used types
pub use container::ServiceContainer;
pub use context::RequestContext;
pub use error::{AppError, AppResult, ErrorContext};
pub use registry::ApplicationRegistry;
pub use request::ServletRequest;
pub use response::{ResponseState, ServletResponse};
pub use traits::*;
