//! Application-server runtime core.
//!
//! A hierarchical naming directory, a component lifecycle manager with
//! stateless, stateful and singleton scopes, and a bounded request
//! dispatcher running an ordered valve pipeline per request.

pub mod application;
pub mod bean;
pub mod config;
pub mod core;
pub mod logging;
pub mod naming;
pub mod orchestration;
pub mod service;
pub mod valve;
