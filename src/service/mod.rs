//! Hosting surface of the runtime
//!
//! [`ServletEngine`] is the module the hosting server calls into;
//! [`AppServer`] assembles it together with everything it depends on.

pub mod engine;
pub mod server;

pub use engine::{ModuleHook, ModuleOutcome, ServletEngine, MODULE_NAME};
pub use server::AppServer;
