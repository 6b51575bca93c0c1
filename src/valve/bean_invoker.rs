use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use validator::Validate;

use crate::{
    bean::Scope,
    core::{AppError, AppResult, ServletRequest, ServletResponse, Valve},
};

pub const VALVE_NAME: &str = "bean-invoker";

const DEFAULT_SESSION_HEADER: &str = "X-Session-Id";

/// Creates a Bean Invoker valve instance with the given configuration.
pub fn create_bean_invoker_valve(cfg: JsonValue) -> AppResult<Arc<dyn Valve>> {
    let config: ValveConfig = serde_json::from_value(cfg)
        .map_err(|e| AppError::Valve(format!("Invalid bean invoker valve config: {e}")))?;

    config
        .validate()
        .map_err(|e| AppError::Valve(format!("Invalid bean invoker valve config: {e}")))?;

    Ok(Arc::new(ValveBeanInvoker { config }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct ValveConfig {
    /// Component name, bare or scheme-prefixed
    #[validate(length(min = 1))]
    bean: String,
    #[validate(length(min = 1))]
    method: String,
    /// Header carrying the session key for stateful components
    #[serde(default = "ValveConfig::default_session_header")]
    session_header: String,
}

impl ValveConfig {
    fn default_session_header() -> String {
        DEFAULT_SESSION_HEADER.to_string()
    }
}

/// Invokes a component method with the JSON request body as arguments and
/// writes the result as the response.
///
/// A JSON array body is spread into positional arguments; any other
/// document is passed as the single argument.
pub struct ValveBeanInvoker {
    config: ValveConfig,
}

impl ValveBeanInvoker {
    fn arguments(request: &ServletRequest) -> AppResult<Vec<JsonValue>> {
        if request.body().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_slice(request.body())? {
            JsonValue::Array(args) => Ok(args),
            other => Ok(vec![other]),
        }
    }

    async fn call(&self, request: &ServletRequest) -> AppResult<JsonValue> {
        let application = request
            .context()
            .ok_or_else(|| AppError::Valve("request has no application context".to_string()))?;
        let args = Self::arguments(request)?;
        let session = request.header(&self.config.session_header);

        let manager = application.bean_manager();
        let instance = manager.lookup(&self.config.bean, session).await?;
        let result = instance.invoke(&self.config.method, &args);
        if instance.descriptor().scope == Scope::Stateless {
            manager.release(instance);
        }
        result
    }
}

#[async_trait]
impl Valve for ValveBeanInvoker {
    fn name(&self) -> &str {
        VALVE_NAME
    }

    async fn invoke(
        &self,
        request: &mut ServletRequest,
        response: &mut ServletResponse,
    ) -> AppResult<()> {
        match self.call(request).await {
            Ok(result) => response.write_json(StatusCode::OK, &json!({ "result": result }))?,
            // client errors are answered here; everything else fails the unit
            Err(err) if err.status_code().is_client_error() => {
                debug!("Bean invocation of {} rejected: {err}", self.config.bean);
                response.write_json(err.status_code(), &json!({ "error": err.to_string() }))?;
            }
            Err(err) => return Err(err),
        }
        request.set_dispatched(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use bytes::Bytes;
    use http::{Method, Uri};

    use super::*;
    use crate::{
        application::testing::application_with,
        bean::{Component, ComponentDescriptor, TypeRegistryFactory},
    };

    struct Cart {
        total: AtomicI64,
    }

    impl Component for Cart {
        fn invoke(&self, method: &str, args: &[JsonValue]) -> AppResult<JsonValue> {
            match method {
                "add" => {
                    let sum: i64 = args.iter().filter_map(JsonValue::as_i64).sum();
                    Ok(json!(self.total.fetch_add(sum, Ordering::SeqCst) + sum))
                }
                "fail" => Err(AppError::Internal("cart storage offline".to_string())),
                other => Err(AppError::Validation(format!("unknown method {other}"))),
            }
        }
    }

    fn shop() -> Arc<crate::application::Application> {
        let factory = TypeRegistryFactory::new().register("Cart", |_, _| {
            Ok(Arc::new(Cart {
                total: AtomicI64::new(0),
            }) as Arc<dyn Component>)
        });
        let app = application_with("shop", Arc::new(factory), Vec::new());
        app.bean_manager()
            .register_descriptor(ComponentDescriptor::new("Cart", "Cart", Scope::Stateful))
            .unwrap();
        app
    }

    fn request(
        app: &Arc<crate::application::Application>,
        session: Option<&str>,
        body: &'static str,
    ) -> ServletRequest {
        let mut request = ServletRequest::new(Method::POST, Uri::from_static("/shop/cart"));
        request.set_body(Bytes::from_static(body.as_bytes()));
        if let Some(session) = session {
            request
                .headers_mut()
                .insert("x-session-id", session.parse().unwrap());
        }
        request.inject_context(app.clone());
        request
    }

    #[tokio::test]
    async fn invokes_stateful_component_per_session() {
        let app = shop();
        let valve = create_bean_invoker_valve(json!({ "bean": "Cart", "method": "add" })).unwrap();

        for (session, body, expected) in [("a", "[1, 2]", 3), ("a", "4", 7), ("b", "[5]", 5)] {
            let mut req = request(&app, Some(session), body);
            let mut resp = ServletResponse::new();
            valve.invoke(&mut req, &mut resp).await.unwrap();

            assert!(req.is_dispatched());
            assert_eq!(resp.status(), StatusCode::OK);
            let body: JsonValue = serde_json::from_slice(resp.body()).unwrap();
            assert_eq!(body, json!({ "result": expected }));
        }
    }

    #[tokio::test]
    async fn missing_session_is_a_client_error() {
        let app = shop();
        let valve = create_bean_invoker_valve(json!({ "bean": "Cart", "method": "add" })).unwrap();

        let mut req = request(&app, None, "");
        let mut resp = ServletResponse::new();
        valve.invoke(&mut req, &mut resp).await.unwrap();

        assert!(req.is_dispatched());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn component_failure_propagates() {
        let app = shop();
        let valve =
            create_bean_invoker_valve(json!({ "bean": "Cart", "method": "fail" })).unwrap();

        let mut req = request(&app, Some("a"), "");
        let mut resp = ServletResponse::new();
        let err = valve.invoke(&mut req, &mut resp).await.unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        assert!(!req.is_dispatched());
    }

    #[test]
    fn bean_and_method_are_required() {
        assert!(create_bean_invoker_valve(json!({ "bean": "Cart" })).is_err());
        assert!(create_bean_invoker_valve(json!({ "bean": "", "method": "add" })).is_err());
    }
}
