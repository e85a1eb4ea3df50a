// Execution status types

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pipeline execution
///
/// `pending -> running -> {completed | failed | cancelled}`. The three
/// terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet dispatched to an executor
    #[default]
    Pending,

    /// Dispatched, steps in progress
    Running,

    /// All steps succeeded
    Completed,

    /// A step exhausted its attempts, or the execution could not proceed
    Failed,

    /// Cancelled by the caller
    Cancelled,
}

impl ExecutionStatus {
    /// Whether no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where an execution's step loop runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    /// On the caller's own runtime
    InContext,

    /// On the isolated runner, reached through the bridge
    Delegated,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InContext => write!(f, "in-context"),
            Self::Delegated => write!(f, "delegated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert_eq!(ExecutionStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&ExecutionStrategy::InContext).unwrap();
        assert_eq!(json, "\"in-context\"");
    }
}
