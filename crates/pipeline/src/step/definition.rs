//! Step executor trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stationflow_schemas::JsonObject;

use super::StepContext;

/// Error type for step failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepError {
    /// Error message, recorded as the step result's error
    pub message: String,

    /// Whether another attempt may be made
    ///
    /// Non-retryable errors fail the step at once, whatever budget is left.
    pub retryable: bool,
}

impl StepError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StepError {}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Everything a step executor reads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInput {
    /// The step's own configuration
    pub config: JsonObject,

    /// The execution's input data
    pub input_data: JsonObject,

    /// Successful results of earlier steps, keyed by step id
    pub previous_results: JsonObject,
}

/// Performs the work for one step kind
///
/// # Example
///
/// ```ignore
/// use stationflow_pipeline::prelude::*;
///
/// struct ThemeExtractor;
///
/// #[async_trait]
/// impl StepExecutor for ThemeExtractor {
///     async fn execute(&self, ctx: &StepContext, input: StepInput) -> Result<Value, StepError> {
///         let text = input.input_data.get("text").and_then(Value::as_str)
///             .ok_or_else(|| StepError::non_retryable("missing text"))?;
///         Ok(json!({ "themes": extract(text) }))
///     }
/// }
/// ```
#[async_trait]
pub trait StepExecutor: Send + Sync + 'static {
    /// Execute one attempt of a step
    ///
    /// # Errors
    ///
    /// Return `StepError::retryable()` for transient failures that should be retried.
    /// Return `StepError::non_retryable()` for permanent failures.
    async fn execute(&self, ctx: &StepContext, input: StepInput) -> Result<Value, StepError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_retryable() {
        let error = StepError::retryable("model overloaded");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "model overloaded");
    }

    #[test]
    fn test_step_error_from_anyhow() {
        let error: StepError = anyhow::anyhow!("socket closed").into();
        assert!(error.retryable);
        assert_eq!(error.message, "socket closed");
    }
}
