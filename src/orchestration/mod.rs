//! Request orchestration layer
//!
//! Routes requests to applications, runs them on bounded execution units
//! and drives the background lifecycle of deployed components.

pub mod dispatcher;
pub mod lifecycle;
pub mod metrics;
pub mod router;
pub mod unit;

pub use dispatcher::{Dispatched, DispatcherConfig, RequestDispatcher};
pub use lifecycle::ComponentLifecycle;
pub use metrics::DispatchMetrics;
pub use router::ApplicationRouter;
pub use unit::{ExecutionUnit, UnitState};
