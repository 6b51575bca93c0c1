use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::core::{AppError, AppResult, ServletRequest, ServletResponse, Valve};

pub const VALVE_NAME: &str = "request-id";

// Constants for configuration and request keys
const DEFAULT_HEADER_NAME: &str = "X-Request-Id";
const ALGORITHM_UUID: &str = "uuid";
const ALGORITHM_RANGE_ID: &str = "range_id";
pub const REQUEST_ID_KEY: &str = "request-id";
const DEFAULT_CHAR_SET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Creates a Request ID valve instance with the given configuration.
pub fn create_request_id_valve(cfg: JsonValue) -> AppResult<Arc<dyn Valve>> {
    let config: ValveConfig = serde_json::from_value(cfg)
        .map_err(|e| AppError::Valve(format!("Invalid request id valve config: {e}")))?;

    config
        .validate()
        .map_err(|e| AppError::Valve(format!("Invalid request id valve config: {e}")))?;

    Ok(Arc::new(ValveRequestID { config }))
}

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
struct ValveConfig {
    #[serde(default = "ValveConfig::default_header_name")]
    header_name: String,
    #[serde(default = "ValveConfig::default_include_in_response")]
    include_in_response: bool,
    #[serde(default = "ValveConfig::default_algorithm")]
    #[validate(custom(function = "ValveConfig::validate_algorithm"))]
    algorithm: String,
    #[serde(default)]
    #[validate(nested)]
    range_id: RangeID,
}

impl ValveConfig {
    fn default_header_name() -> String {
        DEFAULT_HEADER_NAME.to_string()
    }

    fn default_include_in_response() -> bool {
        true
    }

    fn default_algorithm() -> String {
        ALGORITHM_UUID.to_string()
    }

    fn validate_algorithm(algorithm: &String) -> Result<(), ValidationError> {
        if algorithm == ALGORITHM_UUID || algorithm == ALGORITHM_RANGE_ID {
            Ok(())
        } else {
            Err(ValidationError::new(
                "algorithm must be either 'uuid' or 'range_id'",
            ))
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct RangeID {
    #[serde(default = "RangeID::default_char_set")]
    #[validate(length(min = 1))]
    char_set: String,
    #[serde(default = "RangeID::default_length")]
    #[validate(range(min = 1, max = 256))]
    length: u32,
}

impl Default for RangeID {
    fn default() -> Self {
        Self {
            char_set: Self::default_char_set(),
            length: Self::default_length(),
        }
    }
}

impl RangeID {
    fn default_char_set() -> String {
        DEFAULT_CHAR_SET.to_string()
    }

    fn default_length() -> u32 {
        16
    }
}

/// Tags each request with an id, reusing one supplied by the client.
pub struct ValveRequestID {
    config: ValveConfig,
}

impl ValveRequestID {
    fn get_request_id(&self) -> String {
        match self.config.algorithm.as_str() {
            ALGORITHM_RANGE_ID => self.get_range_id(),
            _ => Uuid::new_v4().to_string(),
        }
    }

    fn get_range_id(&self) -> String {
        let chars: Vec<char> = self.config.range_id.char_set.chars().collect();
        let mut rng = rand::thread_rng();
        (0..self.config.range_id.length)
            .filter_map(|_| chars.choose(&mut rng).copied())
            .collect()
    }
}

#[async_trait]
impl Valve for ValveRequestID {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    async fn invoke(
        &self,
        request: &mut ServletRequest,
        response: &mut ServletResponse,
    ) -> AppResult<()> {
        // Retrieve request ID from header, or generate a new one
        let value = match request.header(&self.config.header_name) {
            Some(s) => s.to_string(),
            None => self.get_request_id(),
        };

        if self.config.include_in_response {
            response.insert_header(&self.config.header_name, &value)?;
        }
        request.set(REQUEST_ID_KEY, value);

        Ok(())
    }
}
