use std::{collections::HashMap, time::Duration};

use crate::core::{AppError, AppResult};

/// Idle lifetime after which a stateful instance may be evicted
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(1440);
/// Chance that a stateful resolution also evicts idle instances
pub const DEFAULT_GARBAGE_COLLECTION_PROBABILITY: f64 = 0.1;

const LIFETIME_KEY: &str = "lifetime";
const GC_PROBABILITY_KEY: &str = "garbage_collection_probability";

/// Eviction settings shared by all stateful components of an application
#[derive(Debug, Clone, PartialEq)]
pub struct StatefulSessionSettings {
    pub lifetime: Duration,
    pub garbage_collection_probability: f64,
}

impl Default for StatefulSessionSettings {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            garbage_collection_probability: DEFAULT_GARBAGE_COLLECTION_PROBABILITY,
        }
    }
}

impl StatefulSessionSettings {
    /// Overlay application parameters on top of the current values.
    /// Unrelated keys are ignored.
    pub fn merge_with_params(&mut self, params: &HashMap<String, String>) -> AppResult<()> {
        if let Some(raw) = params.get(LIFETIME_KEY) {
            let secs: f64 = raw.trim().parse().map_err(|e| {
                AppError::Validation(format!("Invalid {LIFETIME_KEY} '{raw}': {e}"))
            })?;
            self.lifetime = Duration::try_from_secs_f64(secs).map_err(|e| {
                AppError::Validation(format!("Invalid {LIFETIME_KEY} '{raw}': {e}"))
            })?;
        }

        if let Some(raw) = params.get(GC_PROBABILITY_KEY) {
            let probability: f64 = raw.trim().parse().map_err(|e| {
                AppError::Validation(format!("Invalid {GC_PROBABILITY_KEY} '{raw}': {e}"))
            })?;
            if !(0.0..=1.0).contains(&probability) {
                return Err(AppError::Validation(format!(
                    "{GC_PROBABILITY_KEY} must be between 0 and 1, got {probability}"
                )));
            }
            self.garbage_collection_probability = probability;
        }

        Ok(())
    }
}
