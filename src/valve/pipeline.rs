use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::core::{AppResult, ServletRequest, ServletResponse, Valve};

pub const PIPELINE_NAME: &str = "valve-pipeline";

/// Ordered chain of valves.
///
/// Valves run in configuration order. Once one marks the request
/// dispatched, the rest are skipped.
#[derive(Default, Clone)]
pub struct ValvePipeline {
    valves: Vec<Arc<dyn Valve>>,
}

impl ValvePipeline {
    pub fn new(valves: Vec<Arc<dyn Valve>>) -> Self {
        Self { valves }
    }

    pub fn len(&self) -> usize {
        self.valves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valves.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.valves.iter().map(|valve| valve.name()).collect()
    }
}

#[async_trait]
impl Valve for ValvePipeline {
    fn name(&self) -> &str {
        PIPELINE_NAME
    }

    async fn invoke(
        &self,
        request: &mut ServletRequest,
        response: &mut ServletResponse,
    ) -> AppResult<()> {
        for valve in &self.valves {
            valve.invoke(request, response).await?;
            if request.is_dispatched() {
                debug!(
                    "Request {} dispatched by valve {}",
                    request.id(),
                    valve.name()
                );
                break;
            }
        }
        Ok(())
    }
}
