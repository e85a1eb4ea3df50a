// Decision: Pipeline behaviour is configured via PIPELINE_* env vars, with defaults
// matching the seven-stations pipeline (60s step timeout, 2 retries, delegated runner).
// Per-run options override these values.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::reliability::RetryPolicy;

/// Where step sequences run by default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunnerMode {
    /// Isolated runner thread behind the message bridge (default)
    #[default]
    Delegated,
    /// The caller's own runtime
    InContext,
}

impl FromStr for RunnerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delegated" | "worker" | "background" | "" => Ok(RunnerMode::Delegated),
            "in-context" | "in_context" | "incontext" | "inprocess" | "main-thread" => {
                Ok(RunnerMode::InContext)
            }
            _ => anyhow::bail!(
                "Unknown runner mode: {}. Use 'delegated' or 'in-context'",
                s
            ),
        }
    }
}

impl std::fmt::Display for RunnerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerMode::Delegated => f.write_str("delegated"),
            RunnerMode::InContext => f.write_str("in-context"),
        }
    }
}

/// Configuration for the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Preferred runner
    pub runner: RunnerMode,
    /// Step timeout used when a run does not set one
    pub step_timeout_ms: u64,
    /// Retry budget given to every resolved station
    pub retry_budget: u32,
    /// Initial retry backoff; 0 retries immediately
    pub retry_backoff_ms: u64,
    /// Prefix for generated execution ids
    pub execution_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            runner: RunnerMode::Delegated,
            step_timeout_ms: 60_000,
            retry_budget: 2,
            retry_backoff_ms: 0,
            execution_prefix: "seven-stations".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let runner = lookup("PIPELINE_RUNNER").unwrap_or_default().parse()?;

        let step_timeout_ms = parse_or(&lookup, "PIPELINE_STEP_TIMEOUT_MS", defaults.step_timeout_ms)?;
        if step_timeout_ms == 0 {
            anyhow::bail!("PIPELINE_STEP_TIMEOUT_MS must be greater than zero");
        }

        let retry_budget = parse_or(&lookup, "PIPELINE_RETRY_BUDGET", defaults.retry_budget)?;
        let retry_backoff_ms =
            parse_or(&lookup, "PIPELINE_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?;

        let execution_prefix = lookup("PIPELINE_EXECUTION_PREFIX")
            .filter(|prefix| !prefix.trim().is_empty())
            .unwrap_or(defaults.execution_prefix);

        Ok(Self {
            runner,
            step_timeout_ms,
            retry_budget,
            retry_backoff_ms,
            execution_prefix,
        })
    }

    /// Retry delay schedule derived from `retry_backoff_ms`
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_backoff_ms == 0 {
            RetryPolicy::immediate()
        } else {
            RetryPolicy::exponential()
                .with_initial_interval(Duration::from_millis(self.retry_backoff_ms))
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw}")),
        _ => Ok(default),
    }
}
