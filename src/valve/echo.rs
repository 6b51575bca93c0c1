use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::{AppError, AppResult, ServletRequest, ServletResponse, Valve};

pub const VALVE_NAME: &str = "echo";

/// Creates an Echo valve instance with the given configuration.
pub fn create_echo_valve(cfg: JsonValue) -> AppResult<Arc<dyn Valve>> {
    let config: ValveConfig = serde_json::from_value(cfg)
        .map_err(|e| AppError::Valve(format!("Invalid echo valve config: {e}")))?;
    let status = StatusCode::from_u16(config.status)
        .map_err(|e| AppError::Valve(format!("Invalid echo valve status: {e}")))?;

    Ok(Arc::new(ValveEcho { config, status }))
}

/// Specifies the response body and optional headers.
#[derive(Default, Debug, Serialize, Deserialize)]
struct ValveConfig {
    /// The response body that will be echoed.
    body: String,

    #[serde(default = "ValveConfig::default_status")]
    status: u16,

    /// Additional response headers to include in the echoed response.
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl ValveConfig {
    fn default_status() -> u16 {
        200
    }
}

/// Answers every request with a fixed response and dispatches it.
pub struct ValveEcho {
    config: ValveConfig,
    status: StatusCode,
}

#[async_trait]
impl Valve for ValveEcho {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    async fn invoke(
        &self,
        request: &mut ServletRequest,
        response: &mut ServletResponse,
    ) -> AppResult<()> {
        response.set_status(self.status);
        for (k, v) in &self.config.headers {
            response.insert_header(k, v)?;
        }
        response.set_body(self.config.body.as_bytes());
        request.set_dispatched(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, Uri};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn echoes_configured_response() {
        let valve = create_echo_valve(json!({
            "body": "pong",
            "status": 202,
            "headers": { "X-Echo": "1" }
        }))
        .unwrap();

        let mut request = ServletRequest::new(Method::GET, Uri::from_static("/shop/ping"));
        let mut response = ServletResponse::new();
        valve.invoke(&mut request, &mut response).await.unwrap();

        assert!(request.is_dispatched());
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body(), b"pong");
        assert_eq!(response.header("x-echo"), Some("1"));
    }

    #[test]
    fn body_is_required() {
        assert!(create_echo_valve(json!({})).is_err());
        assert!(create_echo_valve(json!({ "body": "x", "status": 1000 })).is_err());
    }
}
