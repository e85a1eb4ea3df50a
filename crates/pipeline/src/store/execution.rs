//! Pipeline execution record

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stationflow_schemas::{ExecutionStatus, ExecutionStrategy, StepResult};

use crate::engine::ExecutionUpdate;

/// Aggregate state of one pipeline execution
///
/// Mutated only through [`PipelineExecution::apply`] and friends. Once the
/// status is terminal every further mutation is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineExecution {
    pub id: String,
    pub status: ExecutionStatus,
    pub results: BTreeMap<String, StepResult>,
    /// 0..=100
    pub progress_percent: f64,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExecutionStrategy>,
}

impl PipelineExecution {
    /// New pending execution
    pub fn new(id: impl Into<String>, total_steps: usize) -> Self {
        Self {
            id: id.into(),
            status: ExecutionStatus::Pending,
            results: BTreeMap::new(),
            progress_percent: 0.0,
            completed_steps: 0,
            total_steps,
            started_at: Utc::now(),
            ended_at: None,
            total_duration_ms: None,
            error: None,
            strategy: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `pending -> running`; returns whether the status changed
    pub fn start(&mut self, strategy: ExecutionStrategy) -> bool {
        if self.status != ExecutionStatus::Pending {
            return false;
        }
        self.status = ExecutionStatus::Running;
        self.strategy = Some(strategy);
        true
    }

    /// Apply one update; returns whether it made the execution terminal
    ///
    /// `elapsed` is the monotonic time since the run started and becomes
    /// `total_duration_ms` on the terminal transition.
    pub fn apply(&mut self, update: ExecutionUpdate, elapsed: Duration) -> bool {
        if self.is_terminal() {
            return false;
        }

        match update {
            ExecutionUpdate::Progress {
                progress,
                completed_steps,
                ..
            } => {
                self.progress_percent = progress.clamp(0.0, 100.0);
                self.completed_steps = completed_steps;
                false
            }
            ExecutionUpdate::StepComplete(result) => {
                self.results.insert(result.step_id.clone(), result);
                false
            }
            ExecutionUpdate::Complete { results } => {
                self.results.extend(results);
                self.progress_percent = 100.0;
                self.completed_steps = self.total_steps;
                self.finish(ExecutionStatus::Completed, None, elapsed)
            }
            ExecutionUpdate::Failed { error } => {
                self.finish(ExecutionStatus::Failed, Some(error), elapsed)
            }
            ExecutionUpdate::Cancelled => self.finish(ExecutionStatus::Cancelled, None, elapsed),
        }
    }

    fn finish(&mut self, status: ExecutionStatus, error: Option<String>, elapsed: Duration) -> bool {
        self.status = status;
        self.error = error;
        self.ended_at = Some(Utc::now());
        self.total_duration_ms = Some(elapsed.as_millis() as u64);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn running() -> PipelineExecution {
        let mut execution = PipelineExecution::new("e", 2);
        assert!(execution.start(ExecutionStrategy::InContext));
        execution
    }

    #[test]
    fn test_start_only_from_pending() {
        let mut execution = running();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(!execution.start(ExecutionStrategy::Delegated));
        assert_eq!(execution.strategy, Some(ExecutionStrategy::InContext));
    }

    #[test]
    fn test_complete_sets_progress_and_duration() {
        let mut execution = running();
        let result = StepResult::succeeded("x", json!(1), Duration::from_millis(10), 1);
        execution.apply(ExecutionUpdate::StepComplete(result.clone()), Duration::ZERO);

        let terminal = execution.apply(
            ExecutionUpdate::Complete {
                results: [("x".to_string(), result)].into(),
            },
            Duration::from_millis(25),
        );

        assert!(terminal);
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.progress_percent, 100.0);
        assert_eq!(execution.total_duration_ms, Some(25));
        assert!(execution.ended_at.is_some());
    }

    #[test]
    fn test_terminal_state_is_absorbing() {
        let mut execution = running();
        assert!(execution.apply(
            ExecutionUpdate::Failed {
                error: "boom".into()
            },
            Duration::from_millis(5)
        ));

        assert!(!execution.apply(ExecutionUpdate::Complete { results: BTreeMap::new() }, Duration::ZERO));
        assert!(!execution.apply(ExecutionUpdate::Cancelled, Duration::ZERO));
        assert!(!execution.apply(
            ExecutionUpdate::Progress {
                progress: 100.0,
                completed_steps: 2,
                status: "running".into()
            },
            Duration::ZERO
        ));

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("boom"));
        assert_eq!(execution.progress_percent, 0.0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(running()).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["progressPercent"], 0.0);
        assert_eq!(value["strategy"], "in-context");
        assert!(value.get("endedAt").is_none());
    }
}
