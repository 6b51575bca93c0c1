//! Bounded request dispatcher
//!
//! Each request runs on its own execution unit in a separate task. A
//! semaphore caps how many units run at once; a request that cannot get a
//! slot within the wait timeout is rejected.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use http::StatusCode;
use log::{debug, error, warn};
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    time::timeout,
};
use uuid::Uuid;

use super::{
    metrics::DispatchMetrics,
    unit::{ExecutionUnit, UnitState},
};
use crate::{
    application::Application,
    config, config_error,
    core::{AppError, AppResult, ServletRequest, ServletResponse},
    internal_error,
    valve::ValvePipeline,
};

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub capacity: usize,
    pub wait_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl From<&config::Dispatcher> for DispatcherConfig {
    fn from(conf: &config::Dispatcher) -> Self {
        Self {
            capacity: conf.capacity,
            wait_timeout: conf.wait_timeout(),
        }
    }
}

/// Result of running one request
#[derive(Debug)]
pub struct Dispatched {
    pub unit_id: Uuid,
    pub state: UnitState,
    pub response: ServletResponse,
}

pub struct RequestDispatcher {
    config: DispatcherConfig,
    slots: Arc<Semaphore>,
    idle_units: Arc<Mutex<Vec<ExecutionUnit>>>,
    metrics: Arc<DispatchMetrics>,
}

impl RequestDispatcher {
    pub fn new(config: DispatcherConfig) -> AppResult<Self> {
        if config.capacity == 0 || config.capacity > Semaphore::MAX_PERMITS {
            return Err(config_error!(
                "Dispatcher capacity must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                config.capacity
            ));
        }

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.capacity)),
            idle_units: Arc::new(Mutex::new(Vec::with_capacity(config.capacity))),
            metrics: Arc::new(DispatchMetrics::new()?),
            config,
        })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn gather_metrics(&self) -> AppResult<String> {
        self.metrics.gather()
    }

    /// Execution slots currently free
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Units parked for reuse
    pub async fn idle_units(&self) -> usize {
        self.idle_units.lock().await.len()
    }

    /// Stop accepting new requests. Running units finish normally.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Run a request on an execution unit and wait for its outcome.
    ///
    /// Fails with [`AppError::CapacityExceeded`] when no slot frees up in
    /// time. Faults inside the unit never surface as errors; they come
    /// back as a failed unit with a server-failure response.
    pub async fn dispatch(
        &self,
        application: Arc<Application>,
        request: ServletRequest,
        valves: Arc<ValvePipeline>,
    ) -> AppResult<Dispatched> {
        let permit = self.acquire_slot().await?;

        let mut unit = self.idle_units.lock().await.pop().unwrap_or_default();
        unit.load(application, request, valves);
        let unit_id = unit.id();

        let idle_units = self.idle_units.clone();
        let metrics = self.metrics.clone();
        let capacity = self.config.capacity;
        let started = Instant::now();
        metrics.unit_started();

        // the task owns the permit, so the slot stays taken even if the
        // caller stops waiting
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let state = unit.run().await;
            let (_, response) = unit.copy_out();
            metrics.unit_finished(state, started.elapsed());

            unit.reset();
            let mut idle = idle_units.lock().await;
            if idle.len() < capacity {
                idle.push(unit);
            }
            (state, response)
        });

        match handle.await {
            Ok((state, response)) => {
                debug!("Unit {unit_id} finished in state {}", state.as_str());
                Ok(Dispatched {
                    unit_id,
                    state,
                    response,
                })
            }
            Err(err) => {
                error!("Execution unit {unit_id} aborted: {err}");
                self.metrics
                    .unit_finished(UnitState::Failed, started.elapsed());
                Ok(Dispatched {
                    unit_id,
                    state: UnitState::Failed,
                    response: ServletResponse::failure(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("execution unit {unit_id} aborted: {err}"),
                    ),
                })
            }
        }
    }

    async fn acquire_slot(&self) -> AppResult<OwnedSemaphorePermit> {
        match timeout(self.config.wait_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(internal_error!("Dispatcher is closed to new requests")),
            Err(_) => {
                self.metrics.capacity_exceeded();
                warn!(
                    "No execution slot free after {}ms (capacity {})",
                    self.config.wait_timeout.as_millis(),
                    self.config.capacity
                );
                Err(AppError::CapacityExceeded {
                    waited: self.config.wait_timeout,
                })
            }
        }
    }
}
