// Step types
//
// A Step is the declarative unit of work in a pipeline execution. Steps are
// immutable once submitted and are copied (serialized) whenever they cross
// into another execution context.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object used for step configuration, input data and previous results
pub type JsonObject = Map<String, Value>;

/// Analysis category of a step
///
/// The engine treats the kind as opaque: it is only used to pick the
/// registered executor for the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Characters,
    Themes,
    Structure,
    Screenplay,
    Detailed,
    Full,
}

impl StepKind {
    /// All kinds, in declaration order
    pub const ALL: [StepKind; 6] = [
        StepKind::Characters,
        StepKind::Themes,
        StepKind::Structure,
        StepKind::Screenplay,
        StepKind::Detailed,
        StepKind::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Characters => "characters",
            StepKind::Themes => "themes",
            StepKind::Structure => "structure",
            StepKind::Screenplay => "screenplay",
            StepKind::Detailed => "detailed",
            StepKind::Full => "full",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown step kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown step kind: {0}")]
pub struct UnknownStepKind(pub String);

impl FromStr for StepKind {
    type Err = UnknownStepKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStepKind(s.to_string()))
    }
}

/// One unit of work in a pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique within one execution
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: StepKind,
    /// Parameters passed through to the step's executor
    #[serde(default)]
    pub config: JsonObject,
    /// Per-attempt time limit in milliseconds (must be > 0)
    pub timeout_ms: u64,
    /// Extra attempts allowed after the first one fails
    #[serde(default)]
    pub retry_budget: u32,
    /// Ids of steps in the same execution that must complete first
    #[serde(default, alias = "dependencies")]
    pub depends_on: BTreeSet<String>,
}

impl Step {
    /// Create a step with a 60s timeout, no retries and no dependencies
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind,
            config: JsonObject::new(),
            timeout_ms: 60_000,
            retry_budget: 0,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_config(mut self, config: JsonObject) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Add a dependency on another step id
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }

    /// Per-attempt timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total attempts allowed: the first one plus the retry budget
    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    /// Executor output (success only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure reason (failure only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default = "one")]
    pub attempts: u32,
}

fn one() -> u32 {
    1
}

impl StepResult {
    pub fn succeeded(step_id: impl Into<String>, data: Value, duration: Duration, attempts: u32) -> Self {
        Self {
            step_id: step_id.into(),
            success: true,
            data: Some(data),
            error: None,
            duration_ms: duration.as_millis() as u64,
            attempts,
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms: duration.as_millis() as u64,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_kind_parse() {
        assert_eq!("themes".parse::<StepKind>().unwrap(), StepKind::Themes);
        assert_eq!("FULL".parse::<StepKind>().unwrap(), StepKind::Full);
        assert!("poetry".parse::<StepKind>().is_err());
    }

    #[test]
    fn test_step_builder() {
        let step = Step::new("y", "Y", StepKind::Structure)
            .with_timeout_ms(250)
            .with_retry_budget(2)
            .depends_on("x");

        assert_eq!(step.timeout(), Duration::from_millis(250));
        assert_eq!(step.max_attempts(), 3);
        assert!(step.depends_on.contains("x"));
    }

    #[test]
    fn test_step_wire_shape() {
        let step = Step::new("station-1", "Station 1", StepKind::Characters).depends_on("station-0");
        let value = serde_json::to_value(&step).unwrap();

        assert_eq!(value["kind"], "characters");
        assert_eq!(value["timeoutMs"], 60_000);
        assert_eq!(value["retryBudget"], 0);
        assert_eq!(value["dependsOn"], json!(["station-0"]));
    }

    #[test]
    fn test_step_accepts_dependencies_alias() {
        let step: Step = serde_json::from_value(json!({
            "id": "b",
            "name": "B",
            "kind": "themes",
            "timeoutMs": 100,
            "dependencies": ["a"]
        }))
        .unwrap();

        assert_eq!(step.retry_budget, 0);
        assert!(step.depends_on.contains("a"));
        assert!(step.config.is_empty());
    }

    #[test]
    fn test_step_result_omits_empty_fields() {
        let ok = StepResult::succeeded("a", json!({"n": 1}), Duration::from_millis(12), 1);
        let value = serde_json::to_value(&ok).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["durationMs"], 12);

        let failed = StepResult::failed("a", "boom", Duration::from_millis(3), 3);
        let value = serde_json::to_value(&failed).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["attempts"], 3);
    }
}
