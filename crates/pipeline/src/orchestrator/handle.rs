//! Handle to a running execution

use tokio::sync::watch;

use crate::store::PipelineExecution;

/// Observes one execution as updates arrive
///
/// Returned by [`Orchestrator::run`](super::Orchestrator::run). Dropping the
/// handle does not affect the execution.
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    id: String,
    state: watch::Receiver<PipelineExecution>,
}

impl ExecutionHandle {
    pub(crate) fn new(id: String, state: watch::Receiver<PipelineExecution>) -> Self {
        Self { id, state }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the execution as it is now
    pub fn current(&self) -> PipelineExecution {
        self.state.borrow().clone()
    }

    /// Wait for the terminal state
    pub async fn wait(mut self) -> PipelineExecution {
        if let Ok(execution) = self.state.wait_for(PipelineExecution::is_terminal).await {
            return execution.clone();
        }
        // Record dropped from the store; the last value is all there is
        self.state.borrow().clone()
    }
}
