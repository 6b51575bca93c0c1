//! Server assembly
//!
//! Wires configuration, deployed applications, valves, the servlet engine
//! and the component lifecycle into one runnable unit.

use std::sync::Arc;

use bytes::Bytes;
use log::{info, warn};

use super::engine::{ModuleHook, ModuleOutcome, ServletEngine, MODULE_NAME};
use crate::{
    application::ApplicationFactory,
    bean::ComponentFactory,
    config::Config,
    core::{AppResult, RequestContext, ServiceContainer},
    orchestration::{ComponentLifecycle, DispatcherConfig},
    valve::{build_valve, ValvePipeline},
};

pub struct AppServer {
    container: Arc<ServiceContainer>,
    engine: Arc<ServletEngine>,
    lifecycle: ComponentLifecycle,
}

impl AppServer {
    /// Deploy every configured application and build the valve pipeline.
    pub fn build(config: &Config, factory: Arc<dyn ComponentFactory>) -> AppResult<Self> {
        let container = Arc::new(ServiceContainer::new(config.server.app_base.clone())?);

        for application in &config.applications {
            if ApplicationFactory::visit(&container, application, factory.clone())?.is_none() {
                warn!("Application {} was not deployed", application.name);
            }
        }

        let engine = Arc::new(ServletEngine::new(
            container.clone(),
            DispatcherConfig::from(&config.server.dispatcher),
        )?);

        let valves = config
            .valves
            .iter()
            .map(|valve| build_valve(&valve.name, valve.config_json()?))
            .collect::<AppResult<Vec<_>>>()?;
        engine.init_valves(ValvePipeline::new(valves));
        engine.init_applications()?;

        let lifecycle = ComponentLifecycle::new(container.clone(), config.server.sweep_interval());

        info!(
            "Application server built with {} application(s)",
            container.applications().len()
        );
        Ok(Self {
            container,
            engine,
            lifecycle,
        })
    }

    pub fn container(&self) -> &Arc<ServiceContainer> {
        &self.container
    }

    pub fn engine(&self) -> &Arc<ServletEngine> {
        &self.engine
    }

    pub async fn start(&self) -> AppResult<()> {
        self.lifecycle.initialize().await
    }

    /// Serve one request as the servlet handler.
    pub async fn handle(&self, request: http::Request<Bytes>) -> http::Response<Bytes> {
        let ctx = RequestContext::for_handler(MODULE_NAME);
        let mut response = http::Response::new(Bytes::new());
        if self
            .engine
            .process(request, &mut response, &ctx, ModuleHook::RequestPost)
            .await
            == ModuleOutcome::Skipped
        {
            *response.status_mut() = http::StatusCode::NOT_FOUND;
        }
        response
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.engine.dispatcher().close();
        self.lifecycle.shutdown().await
    }
}
