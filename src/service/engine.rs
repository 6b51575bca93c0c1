//! Servlet engine module
//!
//! The hosting server calls [`ServletEngine::process`] at each module
//! hook. Only the request-post hook of requests routed to this module does
//! any work.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use log::{debug, warn};

use crate::{
    application::Application,
    core::{AppError, AppResult, RequestContext, ServiceContainer, ServletRequest, ServletResponse},
    orchestration::{ApplicationRouter, DispatcherConfig, RequestDispatcher},
    valve::ValvePipeline,
};

pub const MODULE_NAME: &str = "servlet";

/// Points in the hosting server's request processing where modules run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleHook {
    RequestPre,
    RequestPost,
    ResponsePre,
    ResponsePost,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOutcome {
    /// The module left the request alone
    Skipped,
    /// The module produced the response
    Dispatched,
}

pub struct ServletEngine {
    container: Arc<ServiceContainer>,
    dispatcher: RequestDispatcher,
    valves: ArcSwap<ValvePipeline>,
    router: ArcSwap<ApplicationRouter>,
}

impl ServletEngine {
    pub fn new(container: Arc<ServiceContainer>, config: DispatcherConfig) -> AppResult<Self> {
        Ok(Self {
            container,
            dispatcher: RequestDispatcher::new(config)?,
            valves: ArcSwap::from_pointee(ValvePipeline::default()),
            router: ArcSwap::from_pointee(ApplicationRouter::new()),
        })
    }

    pub fn module_name(&self) -> &'static str {
        MODULE_NAME
    }

    pub fn dispatcher(&self) -> &RequestDispatcher {
        &self.dispatcher
    }

    /// Replace the valve pipeline used for subsequent requests.
    pub fn init_valves(&self, valves: ValvePipeline) {
        debug!("Servlet engine valves: {:?}", valves.names());
        self.valves.store(Arc::new(valves));
    }

    pub fn valves(&self) -> Arc<ValvePipeline> {
        self.valves.load_full()
    }

    /// Rebuild the context-path router from the deployed applications.
    pub fn init_applications(&self) -> AppResult<()> {
        let applications = self.container.applications().list();
        let router = ApplicationRouter::build(&applications)?;
        self.router.store(Arc::new(router));
        debug!("Servlet engine routes {} application(s)", applications.len());
        Ok(())
    }

    /// Application whose context path matches the request path
    pub fn find_requested_application(&self, path: &str) -> AppResult<Arc<Application>> {
        let router = self.router.load();
        router
            .match_path(path)
            .and_then(|name| self.container.application(name))
            .ok_or_else(|| AppError::ApplicationNotFound(path.to_string()))
    }

    pub async fn process(
        &self,
        request: http::Request<Bytes>,
        response: &mut http::Response<Bytes>,
        ctx: &RequestContext,
        hook: ModuleHook,
    ) -> ModuleOutcome {
        if hook != ModuleHook::RequestPost || ctx.handler() != Some(MODULE_NAME) {
            return ModuleOutcome::Skipped;
        }

        let servlet_response = match self.handle(request, ctx).await {
            Ok(servlet_response) => servlet_response,
            Err(e) => {
                warn!("Servlet request rejected: {e}");
                ServletResponse::failure(e.status_code(), &e.to_string())
            }
        };
        servlet_response.copy_to_http_response(response);
        ModuleOutcome::Dispatched
    }

    async fn handle(
        &self,
        request: http::Request<Bytes>,
        ctx: &RequestContext,
    ) -> AppResult<ServletResponse> {
        let mut request = ServletRequest::from_http_request(request);
        let application = self.find_requested_application(request.path())?;
        request.inject_server_vars(ctx.server_vars().clone());

        let dispatched = self
            .dispatcher
            .dispatch(application, request, self.valves())
            .await?;
        debug!(
            "Unit {} answered with {}",
            dispatched.unit_id,
            dispatched.response.status()
        );

        Ok(dispatched.response)
    }
}
