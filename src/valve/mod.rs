pub mod bean_invoker;
pub mod echo;
pub mod pipeline;
pub mod request_id;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use crate::core::{AppError, AppResult, Valve, ValveCreateFn};

pub use pipeline::ValvePipeline;

/// Registry mapping valve names to their factory functions.
static VALVE_BUILDER_REGISTRY: Lazy<HashMap<&'static str, ValveCreateFn>> = Lazy::new(|| {
    let arr: Vec<(&str, ValveCreateFn)> = vec![
        (request_id::VALVE_NAME, request_id::create_request_id_valve),
        (echo::VALVE_NAME, echo::create_echo_valve),
        (
            bean_invoker::VALVE_NAME,
            bean_invoker::create_bean_invoker_valve,
        ),
    ];
    arr.into_iter().collect()
});

/// Creates a valve from its configured name and settings.
///
/// Fails fast for unknown valve names and invalid settings.
pub fn build_valve(name: &str, cfg: JsonValue) -> AppResult<Arc<dyn Valve>> {
    let builder = VALVE_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| AppError::Valve(format!("Unknown valve type: {name}")))?;
    builder(cfg)
}

/// Names of every valve that can be configured
pub fn valve_names() -> Vec<&'static str> {
    let mut names: Vec<_> = VALVE_BUILDER_REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}
