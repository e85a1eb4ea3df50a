// Error types for the pipeline engine

use thiserror::Error;

/// Result type alias for pipeline execution
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A malformed step set, detected before any step runs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Dependencies form a cycle; `path` starts and ends on the same id
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A step depends on an id that is not in the step set
    #[error("step {step_id} depends on unknown step {dependency}")]
    UnknownDependency { step_id: String, dependency: String },

    /// Two steps share an id
    #[error("duplicate step id: {0}")]
    DuplicateStep(String),

    /// A step has a zero timeout
    #[error("step {0} has a zero timeout")]
    InvalidTimeout(String),
}

/// Errors that end a pipeline execution
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A step's turn came before its dependencies completed
    #[error("step {step_id} has unsatisfied dependencies: {}", missing.join(", "))]
    UnsatisfiedDependencies { step_id: String, missing: Vec<String> },

    /// The last attempt of a step timed out
    #[error("step {step_id} timed out after {timeout_ms}ms ({attempts} attempts)")]
    StepTimeout {
        step_id: String,
        timeout_ms: u64,
        attempts: u32,
    },

    /// The last attempt of a step returned an error
    #[error("step {step_id} failed after {attempts} attempts: {message}")]
    StepExecution {
        step_id: String,
        message: String,
        attempts: u32,
    },

    /// The delegated channel failed
    #[error("transport error: {0}")]
    Transport(String),

    #[error("execution cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        PipelineError::Transport(msg.into())
    }

    /// Whether this error is a cooperative stop rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

/// Errors from the runner bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is not initialized")]
    NotInitialized,

    #[error("bridge is already initialized")]
    AlreadyInitialized,

    /// An execution with this id is already in flight
    #[error("execution already in flight: {0}")]
    DuplicateExecution(String),

    /// The runner side of the channel is gone
    #[error("runner channel closed")]
    ChannelClosed,

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to start runner: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors from the execution store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("execution already exists: {0}")]
    Duplicate(String),
}

/// Errors returned by the orchestrator before an execution is recorded
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown station: {0}")]
    UnknownStation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = ValidationError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_step_failure_messages() {
        let timeout = PipelineError::StepTimeout {
            step_id: "x".into(),
            timeout_ms: 100,
            attempts: 3,
        };
        assert_eq!(timeout.to_string(), "step x timed out after 100ms (3 attempts)");

        let unmet = PipelineError::UnsatisfiedDependencies {
            step_id: "y".into(),
            missing: vec!["x".into()],
        };
        assert_eq!(unmet.to_string(), "step y has unsatisfied dependencies: x");
    }

    #[test]
    fn test_validation_is_transparent() {
        let err: PipelineError = ValidationError::DuplicateStep("a".into()).into();
        assert_eq!(err.to_string(), "duplicate step id: a");
        assert!(!err.is_cancelled());
        assert!(PipelineError::Cancelled.is_cancelled());
    }
}
