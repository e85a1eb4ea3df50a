//! In-context step executor
//!
//! The `InContextExecutor` runs a step sequence inside the caller's own
//! runtime:
//! - Steps run one at a time, in the order given
//! - Each attempt races the step's work against its timeout
//! - Failed attempts are retried within the step's budget
//! - The cancellation token is checked at every step boundary
//!
//! The isolated runner drives the same loop, so both execution strategies
//! share retry, timeout and ordering behaviour exactly.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use stationflow_schemas::{
    JsonObject, Step, StepResult, STATUS_FAILED, STATUS_RUNNING, STATUS_STARTED,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::reliability::{race_timeout, AttemptError, RetryPolicy};
use crate::step::{StepContext, StepExecutorRegistry, StepInput};

use super::resolver;
use super::update::{ExecutionUpdate, ProgressReporter};

/// How a step sequence ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Every step succeeded
    Completed {
        results: BTreeMap<String, StepResult>,
    },

    /// A step exhausted its attempts or could not run
    Failed {
        results: BTreeMap<String, StepResult>,
        error: PipelineError,
    },

    /// Stopped at a step boundary; results hold only reported steps
    Cancelled {
        results: BTreeMap<String, StepResult>,
    },
}

impl ExecutionOutcome {
    pub fn results(&self) -> &BTreeMap<String, StepResult> {
        match self {
            Self::Completed { results }
            | Self::Failed { results, .. }
            | Self::Cancelled { results } => results,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl From<ExecutionOutcome> for ExecutionUpdate {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed { results } => ExecutionUpdate::Complete { results },
            ExecutionOutcome::Failed { error, .. } => ExecutionUpdate::Failed {
                error: error.to_string(),
            },
            ExecutionOutcome::Cancelled { .. } => ExecutionUpdate::Cancelled,
        }
    }
}

/// Outcome of one step, with the error that would fail the execution
struct StepRun {
    result: StepResult,
    failure: Option<PipelineError>,
}

/// Runs step sequences in the current runtime
#[derive(Debug, Clone)]
pub struct InContextExecutor {
    registry: Arc<StepExecutorRegistry>,
    retry: RetryPolicy,
}

impl InContextExecutor {
    pub fn new(registry: Arc<StepExecutorRegistry>) -> Self {
        Self {
            registry,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the delay schedule between attempts
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<StepExecutorRegistry> {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `steps` in order
    ///
    /// Validation failures end the run before any progress is reported. A
    /// step whose dependencies have not completed when its turn comes fails
    /// the whole run.
    #[instrument(skip(self, steps, input_data, cancel, reporter), fields(steps = steps.len()))]
    pub async fn execute(
        &self,
        execution_id: &str,
        steps: &[Step],
        input_data: &JsonObject,
        cancel: &CancellationToken,
        reporter: &dyn ProgressReporter,
    ) -> ExecutionOutcome {
        let mut results = BTreeMap::new();

        if let Err(err) = resolver::validate(steps) {
            warn!(%execution_id, error = %err, "rejected step set");
            return ExecutionOutcome::Failed {
                results,
                error: err.into(),
            };
        }

        info!(%execution_id, "starting execution");
        reporter.progress(0.0, 0, STATUS_STARTED);

        let total = steps.len();
        let mut completed: HashSet<String> = HashSet::with_capacity(total);
        let mut previous_results = JsonObject::new();

        for (index, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(%execution_id, step_id = %step.id, "cancelled before step");
                return ExecutionOutcome::Cancelled { results };
            }

            if !resolver::can_run(step, &completed) {
                let missing = resolver::missing_dependencies(step, &completed);
                warn!(%execution_id, step_id = %step.id, ?missing, "dependencies not satisfied");
                return ExecutionOutcome::Failed {
                    results,
                    error: PipelineError::UnsatisfiedDependencies {
                        step_id: step.id.clone(),
                        missing,
                    },
                };
            }

            let run = self
                .run_step(execution_id, step, input_data, &previous_results, cancel)
                .await;

            // A step that settles after cancellation is discarded, not reported
            if cancel.is_cancelled() {
                info!(%execution_id, step_id = %step.id, "cancelled during step");
                return ExecutionOutcome::Cancelled { results };
            }

            reporter.step_complete(&run.result);
            let progress = ((index + 1) as f64 / total as f64) * 100.0;

            if let Some(error) = run.failure {
                reporter.progress(progress, index + 1, STATUS_FAILED);
                results.insert(step.id.clone(), run.result);
                warn!(%execution_id, step_id = %step.id, error = %error, "execution failed");
                return ExecutionOutcome::Failed { results, error };
            }

            reporter.progress(progress, index + 1, STATUS_RUNNING);
            debug!(%execution_id, step_id = %step.id, progress, "step completed");

            if let Some(data) = &run.result.data {
                previous_results.insert(step.id.clone(), data.clone());
            }
            completed.insert(step.id.clone());
            results.insert(step.id.clone(), run.result);
        }

        info!(%execution_id, "execution completed");
        ExecutionOutcome::Completed { results }
    }

    /// Run one step with no ordering or dependency checks
    #[instrument(skip(self, step, input_data, previous_results, cancel), fields(step_id = %step.id))]
    pub async fn execute_step(
        &self,
        execution_id: &str,
        step: &Step,
        input_data: &JsonObject,
        previous_results: &JsonObject,
        cancel: &CancellationToken,
    ) -> StepResult {
        self.run_step(execution_id, step, input_data, previous_results, cancel)
            .await
            .result
    }

    async fn run_step(
        &self,
        execution_id: &str,
        step: &Step,
        input_data: &JsonObject,
        previous_results: &JsonObject,
        cancel: &CancellationToken,
    ) -> StepRun {
        let started = Instant::now();
        let max_attempts = step.max_attempts();

        let Some(executor) = self.registry.get(step.kind) else {
            let message = format!("no executor registered for step kind {}", step.kind);
            return StepRun {
                result: StepResult::failed(&step.id, &message, Duration::ZERO, 1),
                failure: Some(PipelineError::StepExecution {
                    step_id: step.id.clone(),
                    message,
                    attempts: 1,
                }),
            };
        };

        let mut attempt = 0;
        let mut last_error = None;

        while attempt < max_attempts {
            attempt += 1;

            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => break,
                }
            }

            let ctx = StepContext::new(
                execution_id,
                &step.id,
                attempt,
                max_attempts,
                cancel.child_token(),
            );
            let input = StepInput {
                config: step.config.clone(),
                input_data: input_data.clone(),
                previous_results: previous_results.clone(),
            };

            let outcome = race_timeout(step.timeout(), executor.execute(&ctx, input))
                .await
                .outcome;

            match outcome {
                Ok(data) => {
                    return StepRun {
                        result: StepResult::succeeded(&step.id, data, started.elapsed(), attempt),
                        failure: None,
                    };
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    if attempt < max_attempts && retryable {
                        warn!(
                            %execution_id,
                            step_id = %step.id,
                            attempt,
                            max_attempts,
                            error = %err,
                            "step attempt failed, retrying"
                        );
                    }
                    last_error = Some(err);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        let (message, failure) = match last_error {
            Some(AttemptError::TimedOut { limit }) => (
                format!("step {} timed out after {}ms", step.id, limit.as_millis()),
                PipelineError::StepTimeout {
                    step_id: step.id.clone(),
                    timeout_ms: step.timeout_ms,
                    attempts: attempt,
                },
            ),
            Some(AttemptError::Failed(err)) => (
                err.message.clone(),
                PipelineError::StepExecution {
                    step_id: step.id.clone(),
                    message: err.message,
                    attempts: attempt,
                },
            ),
            // Cancelled while waiting to retry
            None => ("execution cancelled".to_string(), PipelineError::Cancelled),
        };

        StepRun {
            result: StepResult::failed(&step.id, message, elapsed, attempt),
            failure: Some(failure),
        }
    }
}
