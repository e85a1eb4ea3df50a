//! Step execution context

use tokio_util::sync::CancellationToken;

/// Context handed to a step executor for one attempt
///
/// Cancellation is cooperative. The engine only checks it at step
/// boundaries, so long-running executors should watch [`StepContext::cancelled`]
/// if they want to stop early.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// Execution this step belongs to
    pub execution_id: String,

    /// Step id within the execution
    pub step_id: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed (`1 + retry_budget`)
    pub max_attempts: u32,

    cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        execution_id: impl Into<String>,
        step_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            attempt,
            max_attempts,
            cancel,
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Whether this is the final attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
