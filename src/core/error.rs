//! Unified error handling for appsix
//!
//! Naming, lifecycle and dispatch failures share one error type so that
//! callers can propagate them with `?` across module boundaries.

use std::{fmt, time::Duration};

use http::StatusCode;

/// Unified error types for the runtime core
#[derive(Debug)]
pub enum AppError {
    /// A binding already exists at the requested path
    NameAlreadyBound { name: String, directory: String },

    /// No token chain of the name matched a binding
    NameNotResolvable { name: String, directory: String },

    /// Resolution followed too many subdirectory or reference hops
    NamingDepthExceeded { name: String, depth: usize },

    /// A resolved value was not of the requested type
    TypeMismatch { name: String, expected: &'static str },

    /// A different descriptor was already registered under this name
    DuplicateComponent(String),

    /// No descriptor registered under this name
    UnknownComponent(String),

    /// A stateful component was resolved without a session key
    SessionKeyRequired(String),

    /// The creation strategy failed to build an instance
    Construction { component: String, reason: String },

    /// No execution slot became free within the wait timeout
    CapacityExceeded { waited: Duration },

    /// A fault that an execution unit could not recover from
    UnrecoverableFault(String),

    /// No deployed application matches the request
    ApplicationNotFound(String),

    /// Valve construction or execution errors
    Valve(String),

    /// Configuration-related errors
    Configuration(String),

    /// Validation errors
    Validation(String),

    /// I/O errors
    Io(std::io::Error),

    /// Metric registration errors
    Metrics(prometheus::Error),

    /// Internal system errors
    Internal(String),
}

impl AppError {
    /// Status code used when this error has to be turned into a response
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NameNotResolvable { .. }
            | AppError::UnknownComponent(_)
            | AppError::ApplicationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::SessionKeyRequired(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn construction(component: &str, reason: impl fmt::Display) -> Self {
        AppError::Construction {
            component: component.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NameAlreadyBound { name, directory } => {
                write!(f, "Can't bind {name} to naming directory {directory}: name already bound")
            }
            AppError::NameNotResolvable { name, directory } => {
                write!(f, "Can't resolve {name} in naming directory {directory}")
            }
            AppError::NamingDepthExceeded { name, depth } => {
                write!(f, "Resolution of {name} exceeded maximum depth {depth}")
            }
            AppError::TypeMismatch { name, expected } => {
                write!(f, "Value bound to {name} is not a {expected}")
            }
            AppError::DuplicateComponent(name) => {
                write!(f, "Component {name} is already registered")
            }
            AppError::UnknownComponent(name) => write!(f, "Unknown component: {name}"),
            AppError::SessionKeyRequired(name) => {
                write!(f, "Stateful component {name} requires a session key")
            }
            AppError::Construction { component, reason } => {
                write!(f, "Failed to construct component {component}: {reason}")
            }
            AppError::CapacityExceeded { waited } => write!(
                f,
                "No execution slot available after waiting {}ms",
                waited.as_millis()
            ),
            AppError::UnrecoverableFault(msg) => write!(f, "Unrecoverable fault: {msg}"),
            AppError::ApplicationNotFound(path) => {
                write!(f, "No application deployed for {path}")
            }
            AppError::Valve(msg) => write!(f, "Valve error: {msg}"),
            AppError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            AppError::Validation(msg) => write!(f, "Validation error: {msg}"),
            AppError::Io(err) => write!(f, "I/O error: {err}"),
            AppError::Metrics(err) => write!(f, "Metrics error: {err}"),
            AppError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Metrics(err) => Some(err),
            _ => None,
        }
    }
}

// Error conversions
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<prometheus::Error> for AppError {
    fn from(err: prometheus::Error) -> Self {
        AppError::Metrics(err)
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Result type alias for runtime operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> AppResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> AppResult<T> {
        self.map_err(|e| AppError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::AppError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::AppError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::AppError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::AppError::Internal(format!($fmt, $($arg)*))
    };
}
