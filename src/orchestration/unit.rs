//! Execution unit
//!
//! Runs one request end to end: prepares the application, runs the valve
//! pipeline and records the outcome. Panics and errors raised on the way
//! are contained here and turned into a failure response.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use http::StatusCode;
use log::{debug, error};
use uuid::Uuid;

use crate::{
    application::Application,
    core::{AppError, AppResult, ResponseState, ServletRequest, ServletResponse, Valve},
    valve::ValvePipeline,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Created,
    Preparing,
    Dispatching,
    Completed,
    Failed,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Created => "created",
            UnitState::Preparing => "preparing",
            UnitState::Dispatching => "dispatching",
            UnitState::Completed => "completed",
            UnitState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Completed | UnitState::Failed)
    }
}

/// Reusable worker owning one request at a time.
pub struct ExecutionUnit {
    id: Uuid,
    state: UnitState,
    application: Option<Arc<Application>>,
    valves: Option<Arc<ValvePipeline>>,
    request: Option<ServletRequest>,
    response: ServletResponse,
    fault: Option<String>,
    runs: u64,
}

impl Default for ExecutionUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionUnit {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: UnitState::Created,
            application: None,
            valves: None,
            request: None,
            response: ServletResponse::new(),
            fault: None,
            runs: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    /// Diagnostic of the last failure, if the unit failed
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Number of requests this unit has run
    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn response(&self) -> &ServletResponse {
        &self.response
    }

    /// Hand the unit a request to run.
    pub fn load(
        &mut self,
        application: Arc<Application>,
        request: ServletRequest,
        valves: Arc<ValvePipeline>,
    ) {
        self.state = UnitState::Created;
        self.application = Some(application);
        self.valves = Some(valves);
        self.request = Some(request);
        self.response = ServletResponse::new();
        self.fault = None;
    }

    /// Run the loaded request to a terminal state. Never panics outward.
    pub async fn run(&mut self) -> UnitState {
        self.runs += 1;

        let (Some(application), Some(valves), Some(mut request)) = (
            self.application.clone(),
            self.valves.clone(),
            self.request.take(),
        ) else {
            self.fail("execution unit started without a loaded request".to_string());
            return self.state;
        };

        self.state = UnitState::Preparing;
        let prepared = AssertUnwindSafe(Self::prepare(&application, &mut request))
            .catch_unwind()
            .await;
        if let Err(fault) = Self::contain(prepared) {
            self.request = Some(request);
            self.fail(format!("preparing {} failed: {fault}", application.name()));
            return self.state;
        }

        self.state = UnitState::Dispatching;
        let mut response = ServletResponse::new();
        let dispatched = AssertUnwindSafe(valves.invoke(&mut request, &mut response))
            .catch_unwind()
            .await;
        self.request = Some(request);

        match Self::contain(dispatched) {
            Ok(()) => {
                response.set_state(ResponseState::Dispatch);
                self.response = response;
                self.state = UnitState::Completed;
                debug!("Execution unit {} completed", self.id);
            }
            Err(fault) => self.fail(fault),
        }
        self.state
    }

    /// Register class loaders and attach the application, under the
    /// application's preparation lock.
    async fn prepare(application: &Arc<Application>, request: &mut ServletRequest) -> AppResult<()> {
        let _guard = application.lock().await;
        application.register_class_loaders()?;
        request.inject_context(application.clone());
        Ok(())
    }

    fn contain(outcome: Result<AppResult<()>, Box<dyn Any + Send>>) -> Result<(), String> {
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(panic) => Err(AppError::UnrecoverableFault(panic_message(panic.as_ref())).to_string()),
        }
    }

    fn fail(&mut self, fault: String) {
        error!("Execution unit {} failed: {fault}", self.id);
        let mut response = ServletResponse::failure(StatusCode::INTERNAL_SERVER_ERROR, &fault);
        response.set_state(ResponseState::Dispatch);
        self.response = response;
        self.fault = Some(fault);
        self.state = UnitState::Failed;
    }

    /// Take the outcome, leaving the unit's response empty.
    pub fn copy_out(&mut self) -> (UnitState, ServletResponse) {
        (self.state, std::mem::take(&mut self.response))
    }

    /// Drop every per-request reference so the unit can be reused.
    pub fn reset(&mut self) {
        self.state = UnitState::Created;
        self.application = None;
        self.valves = None;
        self.request = None;
        self.response = ServletResponse::new();
        self.fault = None;
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
