//! Execution updates
//!
//! Both executors report through the same small vocabulary. In-context runs
//! emit these directly; delegated runs produce them by converting runner
//! responses, so the orchestrator applies one kind of event regardless of
//! where the steps ran.

use std::collections::BTreeMap;

use stationflow_schemas::{RunnerResponse, StepResult};
use tokio::sync::mpsc;

/// One event in the life of an execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionUpdate {
    Progress {
        progress: f64,
        completed_steps: usize,
        status: String,
    },
    StepComplete(StepResult),
    Complete {
        results: BTreeMap<String, StepResult>,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl ExecutionUpdate {
    /// Whether this update ends the execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}

impl From<RunnerResponse> for ExecutionUpdate {
    fn from(response: RunnerResponse) -> Self {
        match response {
            RunnerResponse::Progress {
                progress,
                completed_steps,
                status,
                ..
            } => Self::Progress {
                progress,
                completed_steps,
                status,
            },
            step @ RunnerResponse::StepComplete { .. } => match step.into_step_result() {
                Some(result) => Self::StepComplete(result),
                None => Self::Failed {
                    error: "malformed step result".to_string(),
                },
            },
            RunnerResponse::Complete { results, .. } => Self::Complete { results },
            RunnerResponse::Error { error, .. } => Self::Failed { error },
            RunnerResponse::Cancelled { .. } => Self::Cancelled,
        }
    }
}

/// Receives progress from a running step loop
///
/// Calls are made synchronously, in step order, before the loop moves on.
pub trait ProgressReporter: Send + Sync {
    fn progress(&self, progress: f64, completed_steps: usize, status: &str);

    fn step_complete(&self, result: &StepResult);
}

/// Reporter that forwards to an update channel; a dropped receiver is ignored
impl ProgressReporter for mpsc::UnboundedSender<ExecutionUpdate> {
    fn progress(&self, progress: f64, completed_steps: usize, status: &str) {
        let _ = self.send(ExecutionUpdate::Progress {
            progress,
            completed_steps,
            status: status.to_string(),
        });
    }

    fn step_complete(&self, result: &StepResult) {
        let _ = self.send(ExecutionUpdate::StepComplete(result.clone()));
    }
}

/// Reporter that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn progress(&self, _progress: f64, _completed_steps: usize, _status: &str) {}

    fn step_complete(&self, _result: &StepResult) {}
}
