//! Remote runner
//!
//! Runs step sequences on a dedicated OS thread with its own single-threaded
//! Tokio runtime. The only way in or out is a pair of JSON frame channels:
//! requests are decoded on arrival and every response is encoded before it
//! leaves, so nothing is shared with the caller by reference.

use std::collections::HashMap;
use std::io;
use std::thread;

use stationflow_schemas::{RunnerRequest, RunnerResponse, StepResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::{ExecutionOutcome, InContextExecutor, ProgressReporter};

/// Name of the runner thread
pub const RUNNER_THREAD_NAME: &str = "stationflow-runner";

/// Encode and send one response frame
fn send_frame(tx: &mpsc::UnboundedSender<String>, response: &RunnerResponse) {
    match serde_json::to_string(response) {
        Ok(frame) => {
            if tx.send(frame).is_err() {
                debug!("response channel closed, dropping frame");
            }
        }
        Err(err) => error!(error = %err, "failed to encode runner response"),
    }
}

/// Progress reporter that writes response frames for one execution
struct FrameReporter {
    execution_id: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ProgressReporter for FrameReporter {
    fn progress(&self, progress: f64, completed_steps: usize, status: &str) {
        send_frame(
            &self.tx,
            &RunnerResponse::Progress {
                execution_id: self.execution_id.clone(),
                progress,
                completed_steps,
                status: status.to_string(),
            },
        );
    }

    fn step_complete(&self, result: &StepResult) {
        send_frame(
            &self.tx,
            &RunnerResponse::step_complete(&self.execution_id, result.clone()),
        );
    }
}

/// Start the runner thread
///
/// The thread exits once `requests` is closed. In-flight executions are
/// dropped with it.
pub fn spawn_runner(
    executor: InContextExecutor,
    requests: mpsc::UnboundedReceiver<String>,
    responses: mpsc::UnboundedSender<String>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name(RUNNER_THREAD_NAME.to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!(error = %err, "failed to build runner runtime");
                    send_frame(
                        &responses,
                        &RunnerResponse::Error {
                            execution_id: None,
                            error: format!("runner failed to start: {err}"),
                        },
                    );
                    return;
                }
            };

            let (runner, done_rx) = RunnerLoop::new(executor, responses);
            runtime.block_on(runner.run(requests, done_rx));
            info!("runner stopped");
        })
}

/// State owned by the runner thread
struct RunnerLoop {
    executor: InContextExecutor,
    responses: mpsc::UnboundedSender<String>,
    /// Cancellation tokens of running executions, tagged with a generation
    active: HashMap<String, (u64, CancellationToken)>,
    generation: u64,
    /// Finished executions report back here so their tokens can be dropped
    done_tx: mpsc::UnboundedSender<(String, u64)>,
}

type DoneReceiver = mpsc::UnboundedReceiver<(String, u64)>;

impl RunnerLoop {
    fn new(
        executor: InContextExecutor,
        responses: mpsc::UnboundedSender<String>,
    ) -> (Self, DoneReceiver) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let runner = Self {
            executor,
            responses,
            active: HashMap::new(),
            generation: 0,
            done_tx,
        };
        (runner, done_rx)
    }

    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<String>,
        mut done_rx: DoneReceiver,
    ) {
        info!("runner started");

        loop {
            tokio::select! {
                frame = requests.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => break,
                },
                Some((execution_id, generation)) = done_rx.recv() => {
                    if self.active.get(&execution_id).map(|(g, _)| *g) == Some(generation) {
                        self.active.remove(&execution_id);
                    }
                }
            }
        }

        for (_, token) in self.active.values() {
            token.cancel();
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let request: RunnerRequest = match serde_json::from_str(frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "rejecting undecodable request");
                send_frame(
                    &self.responses,
                    &RunnerResponse::Error {
                        execution_id: None,
                        error: format!("invalid request: {err}"),
                    },
                );
                return;
            }
        };

        match request {
            RunnerRequest::Cancel { execution_id } => match self.active.get(&execution_id) {
                Some((_, token)) => {
                    info!(%execution_id, "cancelling execution");
                    token.cancel();
                }
                None => debug!(%execution_id, "cancel for unknown execution ignored"),
            },
            RunnerRequest::ExecutePipeline {
                execution_id,
                steps,
                input_data,
            } => {
                let Some(token) = self.register(&execution_id) else {
                    return;
                };
                let executor = self.executor.clone();
                let tx = self.responses.clone();
                let id = execution_id.clone();

                self.spawn_execution(execution_id, async move {
                    let reporter = FrameReporter {
                        execution_id: id.clone(),
                        tx,
                    };
                    let outcome = executor
                        .execute(&id, &steps, &input_data, &token, &reporter)
                        .await;

                    match outcome {
                        ExecutionOutcome::Completed { results } => RunnerResponse::Complete {
                            execution_id: id,
                            results,
                        },
                        ExecutionOutcome::Failed { error, .. } => RunnerResponse::Error {
                            execution_id: Some(id),
                            error: error.to_string(),
                        },
                        ExecutionOutcome::Cancelled { .. } => {
                            RunnerResponse::Cancelled { execution_id: id }
                        }
                    }
                });
            }
            RunnerRequest::ExecuteStep {
                execution_id,
                step,
                input_data,
                previous_results,
            } => {
                let Some(token) = self.register(&execution_id) else {
                    return;
                };
                let executor = self.executor.clone();
                let id = execution_id.clone();

                self.spawn_execution(execution_id, async move {
                    let result = executor
                        .execute_step(&id, &step, &input_data, &previous_results, &token)
                        .await;

                    if token.is_cancelled() {
                        RunnerResponse::Cancelled { execution_id: id }
                    } else {
                        RunnerResponse::step_complete(id, result)
                    }
                });
            }
        }
    }

    /// Track a new execution; refuses ids that are still running
    fn register(&mut self, execution_id: &str) -> Option<CancellationToken> {
        if self.active.contains_key(execution_id) {
            warn!(%execution_id, "execution already running");
            send_frame(
                &self.responses,
                &RunnerResponse::Error {
                    execution_id: None,
                    error: format!("execution {execution_id} is already running"),
                },
            );
            return None;
        }

        self.generation += 1;
        let token = CancellationToken::new();
        self.active
            .insert(execution_id.to_string(), (self.generation, token.clone()));
        Some(token)
    }

    /// Run one execution as its own task and send its final response
    ///
    /// A panic inside the task is reported as an execution error.
    fn spawn_execution<F>(&self, execution_id: String, work: F)
    where
        F: std::future::Future<Output = RunnerResponse> + Send + 'static,
    {
        let task = tokio::spawn(work);
        let tx = self.responses.clone();
        let done_tx = self.done_tx.clone();
        let generation = self.generation;

        tokio::spawn(async move {
            match task.await {
                Ok(response) => send_frame(&tx, &response),
                Err(err) if err.is_panic() => {
                    error!(%execution_id, "execution task panicked");
                    send_frame(
                        &tx,
                        &RunnerResponse::Error {
                            execution_id: Some(execution_id.clone()),
                            error: "runner task panicked".to_string(),
                        },
                    );
                }
                Err(_) => debug!(%execution_id, "execution task aborted"),
            }
            let _ = done_tx.send((execution_id, generation));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepError, StepExecutorRegistry};
    use serde_json::json;
    use stationflow_schemas::{JsonObject, Step, StepKind};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        requests: mpsc::UnboundedSender<String>,
        responses: mpsc::UnboundedReceiver<String>,
        thread: thread::JoinHandle<()>,
    }

    impl Harness {
        fn start() -> Self {
            let mut registry = StepExecutorRegistry::new();
            registry.register_fn(StepKind::Full, |ctx, _input| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({ "step": ctx.step_id }))
            });
            registry.register_fn(StepKind::Themes, |_ctx, _input| async {
                Err(StepError::non_retryable("no themes"))
            });
            registry.register_fn(StepKind::Detailed, |_ctx, input| async move {
                if input.input_data.is_empty() {
                    panic!("analyzer crashed");
                }
                Ok(json!(null))
            });
            let executor = InContextExecutor::new(Arc::new(registry));

            let (req_tx, req_rx) = mpsc::unbounded_channel();
            let (resp_tx, resp_rx) = mpsc::unbounded_channel();
            let thread = spawn_runner(executor, req_rx, resp_tx).unwrap();

            Self {
                requests: req_tx,
                responses: resp_rx,
                thread,
            }
        }

        fn send(&self, request: &RunnerRequest) {
            self.requests
                .send(serde_json::to_string(request).unwrap())
                .unwrap();
        }

        async fn next(&mut self) -> RunnerResponse {
            let frame = tokio::time::timeout(Duration::from_secs(5), self.responses.recv())
                .await
                .unwrap()
                .unwrap();
            serde_json::from_str(&frame).unwrap()
        }

        /// Collect responses until the first terminal one
        async fn until_terminal(&mut self) -> Vec<RunnerResponse> {
            let mut seen = Vec::new();
            loop {
                let response = self.next().await;
                let done = response.is_terminal();
                seen.push(response);
                if done {
                    return seen;
                }
            }
        }
    }

    fn pipeline(id: &str, steps: Vec<Step>) -> RunnerRequest {
        RunnerRequest::ExecutePipeline {
            execution_id: id.to_string(),
            steps,
            input_data: JsonObject::new(),
        }
    }

    #[tokio::test]
    async fn test_pipeline_round_trip() {
        let mut harness = Harness::start();
        harness.send(&pipeline(
            "e1",
            vec![
                Step::new("x", "X", StepKind::Full),
                Step::new("y", "Y", StepKind::Full).depends_on("x"),
            ],
        ));

        let responses = harness.until_terminal().await;
        assert_eq!(responses.len(), 6);
        assert!(matches!(&responses[0], RunnerResponse::Progress { status, .. } if status == "started"));
        match responses.last().unwrap() {
            RunnerResponse::Complete { execution_id, results } => {
                assert_eq!(execution_id, "e1");
                assert_eq!(results.len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_request_gets_anonymous_error() {
        let mut harness = Harness::start();
        harness.requests.send("{not json".to_string()).unwrap();

        match harness.next().await {
            RunnerResponse::Error { execution_id, error } => {
                assert!(execution_id.is_none());
                assert!(error.starts_with("invalid request"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_failure_reports_error_with_id() {
        let mut harness = Harness::start();
        harness.send(&pipeline("e2", vec![Step::new("t", "T", StepKind::Themes)]));

        let responses = harness.until_terminal().await;
        match responses.last().unwrap() {
            RunnerResponse::Error { execution_id, error } => {
                assert_eq!(execution_id.as_deref(), Some("e2"));
                assert!(error.contains("no themes"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let mut harness = Harness::start();
        harness.send(&pipeline("e3", vec![Step::new("d", "D", StepKind::Detailed)]));

        let responses = harness.until_terminal().await;
        assert_eq!(
            responses.last().unwrap(),
            &RunnerResponse::Error {
                execution_id: Some("e3".into()),
                error: "runner task panicked".into()
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_at_step_boundary() {
        let mut harness = Harness::start();
        let steps = (0..5)
            .map(|i| Step::new(format!("s{i}"), "S", StepKind::Full))
            .collect();
        harness.send(&pipeline("e4", steps));

        // Wait for the first step to finish, then cancel
        loop {
            if let RunnerResponse::StepComplete { .. } = harness.next().await {
                break;
            }
        }
        harness.send(&RunnerRequest::Cancel {
            execution_id: "e4".into(),
        });

        let responses = harness.until_terminal().await;
        assert_eq!(
            responses.last().unwrap(),
            &RunnerResponse::Cancelled {
                execution_id: "e4".into()
            }
        );
        let cancelled = responses
            .iter()
            .filter(|r| matches!(r, RunnerResponse::Cancelled { .. }))
            .count();
        assert_eq!(cancelled, 1);
    }

    #[tokio::test]
    async fn test_single_step_mode_ignores_dependencies() {
        let mut harness = Harness::start();
        harness.send(&RunnerRequest::ExecuteStep {
            execution_id: "e5".into(),
            step: Step::new("y", "Y", StepKind::Full).depends_on("x"),
            input_data: JsonObject::new(),
            previous_results: JsonObject::new(),
        });

        match harness.next().await {
            RunnerResponse::StepComplete { step_id, success, .. } => {
                assert_eq!(step_id, "y");
                assert!(success);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closing_requests_stops_thread() {
        let harness = Harness::start();
        assert_eq!(harness.thread.thread().name(), Some(RUNNER_THREAD_NAME));

        drop(harness.requests);
        tokio::task::spawn_blocking(move || harness.thread.join())
            .await
            .unwrap()
            .unwrap();
    }
}
