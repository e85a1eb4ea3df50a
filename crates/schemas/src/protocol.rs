// Runner wire protocol
//
// The closed set of messages exchanged between the caller-side bridge and the
// isolated runner. Every message carries its execution id so several
// executions can share one channel. Both sides encode these as JSON frames;
// this is the only interface that must match exactly between the two
// execution contexts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::step::{JsonObject, Step, StepResult};

/// Progress status sent when an execution starts
pub const STATUS_STARTED: &str = "started";
/// Progress status sent after each completed step
pub const STATUS_RUNNING: &str = "running";
/// Progress status sent after a step exhausted its attempts
pub const STATUS_FAILED: &str = "failed";

/// Caller -> runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunnerRequest {
    /// Run a whole step sequence
    #[serde(rename_all = "camelCase")]
    ExecutePipeline {
        execution_id: String,
        steps: Vec<Step>,
        #[serde(default)]
        input_data: JsonObject,
    },

    /// Run one step with no ordering or dependency checks
    #[serde(rename_all = "camelCase")]
    ExecuteStep {
        execution_id: String,
        step: Step,
        #[serde(default)]
        input_data: JsonObject,
        #[serde(default)]
        previous_results: JsonObject,
    },

    /// Stop an execution at its next step boundary
    #[serde(rename_all = "camelCase")]
    Cancel { execution_id: String },
}

impl RunnerRequest {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutePipeline { execution_id, .. }
            | Self::ExecuteStep { execution_id, .. }
            | Self::Cancel { execution_id } => execution_id,
        }
    }
}

/// Runner -> caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunnerResponse {
    #[serde(rename_all = "camelCase")]
    Progress {
        execution_id: String,
        /// Percentage in 0..=100
        progress: f64,
        completed_steps: usize,
        status: String,
    },

    #[serde(rename_all = "camelCase")]
    StepComplete {
        execution_id: String,
        step_id: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default = "one")]
        attempts: u32,
    },

    #[serde(rename_all = "camelCase")]
    Complete {
        execution_id: String,
        results: BTreeMap<String, StepResult>,
    },

    /// Execution-level failure; without an id it cannot be attributed
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    Cancelled { execution_id: String },
}

fn one() -> u32 {
    1
}

impl RunnerResponse {
    /// Build a `StepComplete` from a step result
    pub fn step_complete(execution_id: impl Into<String>, result: StepResult) -> Self {
        Self::StepComplete {
            execution_id: execution_id.into(),
            step_id: result.step_id,
            success: result.success,
            result: result.data,
            error: result.error,
            duration_ms: result.duration_ms,
            attempts: result.attempts,
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        match self {
            Self::Progress { execution_id, .. }
            | Self::StepComplete { execution_id, .. }
            | Self::Complete { execution_id, .. }
            | Self::Cancelled { execution_id } => Some(execution_id),
            Self::Error { execution_id, .. } => execution_id.as_deref(),
        }
    }

    /// Whether this response ends its execution
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Complete { .. } | Self::Cancelled { .. } => true,
            Self::Error { execution_id, .. } => execution_id.is_some(),
            Self::Progress { .. } | Self::StepComplete { .. } => false,
        }
    }

    /// Convert a `StepComplete` back into a step result
    pub fn into_step_result(self) -> Option<StepResult> {
        match self {
            Self::StepComplete {
                step_id,
                success,
                result,
                error,
                duration_ms,
                attempts,
                ..
            } => Some(StepResult {
                step_id,
                success,
                data: result,
                error,
                duration_ms,
                attempts,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepKind;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_request_tags() {
        let request = RunnerRequest::ExecutePipeline {
            execution_id: "exec-1".to_string(),
            steps: vec![Step::new("a", "A", StepKind::Themes)],
            input_data: JsonObject::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "execute-pipeline");
        assert_eq!(value["executionId"], "exec-1");
        assert_eq!(value["inputData"], json!({}));

        let cancel = RunnerRequest::Cancel {
            execution_id: "exec-1".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&cancel).unwrap(),
            r#"{"type":"cancel","executionId":"exec-1"}"#
        );
    }

    #[test]
    fn test_decode_execute_step_without_previous_results() {
        let request: RunnerRequest = serde_json::from_value(json!({
            "type": "execute-step",
            "executionId": "exec-2",
            "step": {"id": "a", "name": "A", "kind": "full", "timeoutMs": 50},
            "inputData": {"scriptId": "s"}
        }))
        .unwrap();

        assert_eq!(request.execution_id(), "exec-2");
        match request {
            RunnerRequest::ExecuteStep {
                previous_results, ..
            } => assert!(previous_results.is_empty()),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_response_tags() {
        let progress = RunnerResponse::Progress {
            execution_id: "e".to_string(),
            progress: 50.0,
            completed_steps: 1,
            status: STATUS_RUNNING.to_string(),
        };
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["completedSteps"], 1);

        let error = RunnerResponse::Error {
            execution_id: None,
            error: "bad frame".to_string(),
        };
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["type"], "error");
        assert!(value.get("executionId").is_none());
    }

    #[test]
    fn test_terminal_responses() {
        let id = || "e".to_string();
        assert!(RunnerResponse::Cancelled { execution_id: id() }.is_terminal());
        assert!(RunnerResponse::Complete {
            execution_id: id(),
            results: BTreeMap::new()
        }
        .is_terminal());
        assert!(RunnerResponse::Error {
            execution_id: Some(id()),
            error: "x".into()
        }
        .is_terminal());
        assert!(!RunnerResponse::Error {
            execution_id: None,
            error: "x".into()
        }
        .is_terminal());
        assert!(!RunnerResponse::Progress {
            execution_id: id(),
            progress: 0.0,
            completed_steps: 0,
            status: STATUS_STARTED.into()
        }
        .is_terminal());
    }

    #[test]
    fn test_step_complete_conversion() {
        let result = StepResult::succeeded("a", json!({"ok": true}), Duration::from_millis(7), 2);
        let response = RunnerResponse::step_complete("e", result.clone());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"type\":\"step-complete\""));
        assert!(json.contains("\"stepId\":\"a\""));

        let decoded: RunnerResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.into_step_result(), Some(result));
    }
}
