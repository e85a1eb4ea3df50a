//! Caller-side bridge to the remote runner
//!
//! The bridge owns the request channel to the runner and a registry of
//! in-flight executions. Each registered execution gets its own update
//! channel; responses arriving from the runner are decoded and routed there
//! by execution id. The registry entry is dropped on the first terminal
//! response, which closes the caller's receiver.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use stationflow_schemas::{JsonObject, RunnerRequest, RunnerResponse, Step};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{ExecutionUpdate, InContextExecutor};
use crate::error::{BridgeError, PipelineError};

use super::runner::spawn_runner;

/// Receiver for one execution's updates
pub type UpdateReceiver = mpsc::UnboundedReceiver<ExecutionUpdate>;

/// Registry entry for one in-flight execution
struct Route {
    tx: mpsc::UnboundedSender<ExecutionUpdate>,
    /// Single-step requests end at their `StepComplete`
    single_step: bool,
}

#[derive(Default)]
struct BridgeInner {
    requests: Mutex<Option<mpsc::UnboundedSender<String>>>,
    routes: Mutex<HashMap<String, Route>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    runner: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Message bridge between the caller and an isolated runner
///
/// Cheap to clone; clones share the same channel and registry.
#[derive(Clone, Default)]
pub struct RunnerBridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for RunnerBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerBridge")
            .field("initialized", &self.is_initialized())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl RunnerBridge {
    /// Create an uninitialized bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the runner thread and connect to it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn initialize(&self, executor: InContextExecutor) -> Result<(), BridgeError> {
        if self.is_initialized() {
            return Err(BridgeError::AlreadyInitialized);
        }

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let handle = spawn_runner(executor, request_rx, response_tx)?;

        self.connect(request_tx, response_rx)?;
        *self.inner.runner.lock() = Some(handle);
        info!("runner bridge initialized");
        Ok(())
    }

    /// Attach to an arbitrary pair of frame channels
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        &self,
        requests: mpsc::UnboundedSender<String>,
        responses: mpsc::UnboundedReceiver<String>,
    ) -> Result<(), BridgeError> {
        let mut slot = self.inner.requests.lock();
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(BridgeError::AlreadyInitialized);
        }
        *slot = Some(requests);
        drop(slot);

        let inner = self.inner.clone();
        let dispatcher = tokio::spawn(async move { inner.dispatch(responses).await });
        if let Some(previous) = self.inner.dispatcher.lock().replace(dispatcher) {
            previous.abort();
        }
        Ok(())
    }

    /// Whether a live channel to the runner exists
    pub fn is_initialized(&self) -> bool {
        self.inner
            .requests
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of registered in-flight executions
    pub fn in_flight(&self) -> usize {
        self.inner.routes.lock().len()
    }

    /// Run a step sequence on the runner
    pub fn execute_pipeline(
        &self,
        execution_id: &str,
        steps: &[Step],
        input_data: &JsonObject,
    ) -> Result<UpdateReceiver, BridgeError> {
        let request = RunnerRequest::ExecutePipeline {
            execution_id: execution_id.to_string(),
            steps: steps.to_vec(),
            input_data: input_data.clone(),
        };
        self.submit(request, false)
    }

    /// Run one step on the runner, with no dependency checks
    ///
    /// The receiver yields a single `StepComplete` (or a failure) and closes.
    pub fn execute_step(
        &self,
        execution_id: &str,
        step: &Step,
        input_data: &JsonObject,
        previous_results: &JsonObject,
    ) -> Result<UpdateReceiver, BridgeError> {
        let request = RunnerRequest::ExecuteStep {
            execution_id: execution_id.to_string(),
            step: step.clone(),
            input_data: input_data.clone(),
            previous_results: previous_results.clone(),
        };
        self.submit(request, true)
    }

    /// Ask the runner to stop an execution and forget it locally
    ///
    /// Returns whether the execution was registered. Nothing more is
    /// delivered to its receiver after this call.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let removed = self.inner.routes.lock().remove(execution_id).is_some();

        let request = RunnerRequest::Cancel {
            execution_id: execution_id.to_string(),
        };
        match self.send(&request) {
            Ok(()) => debug!(%execution_id, "cancel sent"),
            Err(err) => debug!(%execution_id, error = %err, "cancel not sent"),
        }
        removed
    }

    /// Drop the runner channel and every registered execution
    ///
    /// The runner thread exits once it sees the closed channel.
    pub fn terminate(&self) {
        if let Some(dispatcher) = self.inner.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.inner.requests.lock().take();
        let dropped = {
            let mut routes = self.inner.routes.lock();
            let count = routes.len();
            routes.clear();
            count
        };
        self.inner.runner.lock().take();
        info!(dropped, "runner bridge terminated");
    }

    fn submit(&self, request: RunnerRequest, single_step: bool) -> Result<UpdateReceiver, BridgeError> {
        if !self.is_initialized() {
            return Err(BridgeError::NotInitialized);
        }

        let execution_id = request.execution_id().to_string();
        let frame = serde_json::to_string(&request)?;
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut routes = self.inner.routes.lock();
            if routes.contains_key(&execution_id) {
                return Err(BridgeError::DuplicateExecution(execution_id));
            }
            routes.insert(execution_id.clone(), Route { tx, single_step });
        }

        if let Err(err) = self.send_frame(frame) {
            self.inner.routes.lock().remove(&execution_id);
            return Err(err);
        }

        debug!(%execution_id, single_step, "request sent to runner");
        Ok(rx)
    }

    fn send(&self, request: &RunnerRequest) -> Result<(), BridgeError> {
        let frame = serde_json::to_string(request)?;
        self.send_frame(frame)
    }

    fn send_frame(&self, frame: String) -> Result<(), BridgeError> {
        let requests = self.inner.requests.lock();
        let tx = requests.as_ref().ok_or(BridgeError::NotInitialized)?;
        tx.send(frame).map_err(|_| BridgeError::ChannelClosed)
    }
}

impl BridgeInner {
    async fn dispatch(&self, mut responses: mpsc::UnboundedReceiver<String>) {
        while let Some(frame) = responses.recv().await {
            match serde_json::from_str::<RunnerResponse>(&frame) {
                Ok(response) => self.route(response),
                Err(err) => warn!(error = %err, "dropping undecodable runner frame"),
            }
        }

        self.transport_failed("runner channel closed");
    }

    fn route(&self, response: RunnerResponse) {
        let Some(execution_id) = response.execution_id().map(str::to_string) else {
            if let RunnerResponse::Error { error, .. } = &response {
                warn!(%error, "runner error without execution id");
            }
            return;
        };

        let mut routes = self.routes.lock();
        let Some(route) = routes.get(&execution_id) else {
            debug!(%execution_id, "response for unregistered execution dropped");
            return;
        };

        let finished = response.is_terminal()
            || (route.single_step && matches!(response, RunnerResponse::StepComplete { .. }));

        if route.tx.send(ExecutionUpdate::from(response)).is_err() {
            debug!(%execution_id, "update receiver dropped");
        }
        if finished {
            routes.remove(&execution_id);
        }
    }

    /// Broadcast a transport failure to every registered execution
    fn transport_failed(&self, reason: &str) {
        self.requests.lock().take();

        let routes: Vec<(String, Route)> = self.routes.lock().drain().collect();
        if routes.is_empty() {
            debug!(reason, "runner channel closed with nothing in flight");
            return;
        }

        error!(reason, affected = routes.len(), "runner transport failed");
        let error = PipelineError::transport(reason).to_string();
        for (_, route) in routes {
            let _ = route.tx.send(ExecutionUpdate::Failed {
                error: error.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stationflow_schemas::{StepKind, StepResult};
    use std::time::Duration;

    /// Bridge connected to channels the test drives by hand
    fn connected() -> (
        RunnerBridge,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let bridge = RunnerBridge::new();
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        bridge.connect(req_tx, resp_rx).unwrap();
        (bridge, req_rx, resp_tx)
    }

    fn frame(response: &RunnerResponse) -> String {
        serde_json::to_string(response).unwrap()
    }

    fn steps() -> Vec<Step> {
        vec![Step::new("a", "A", StepKind::Full)]
    }

    #[tokio::test]
    async fn test_uninitialized_bridge_rejects_requests() {
        let bridge = RunnerBridge::new();
        assert!(!bridge.is_initialized());
        assert!(matches!(
            bridge.execute_pipeline("e", &steps(), &JsonObject::new()),
            Err(BridgeError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_request_is_framed_and_routed() {
        let (bridge, mut req_rx, resp_tx) = connected();
        let mut updates = bridge
            .execute_pipeline("e1", &steps(), &JsonObject::new())
            .unwrap();

        let sent: RunnerRequest = serde_json::from_str(&req_rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent.execution_id(), "e1");
        assert_eq!(bridge.in_flight(), 1);

        let result = StepResult::succeeded("a", json!(1), Duration::from_millis(3), 1);
        resp_tx.send(frame(&RunnerResponse::step_complete("e1", result.clone()))).unwrap();
        resp_tx
            .send(frame(&RunnerResponse::Complete {
                execution_id: "e1".into(),
                results: [("a".to_string(), result.clone())].into(),
            }))
            .unwrap();

        assert_eq!(updates.recv().await, Some(ExecutionUpdate::StepComplete(result)));
        assert!(matches!(updates.recv().await, Some(ExecutionUpdate::Complete { .. })));
        assert_eq!(updates.recv().await, None);
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_execution_rejected() {
        let (bridge, _req_rx, _resp_tx) = connected();
        let _updates = bridge.execute_pipeline("dup", &steps(), &JsonObject::new()).unwrap();

        assert!(matches!(
            bridge.execute_pipeline("dup", &steps(), &JsonObject::new()),
            Err(BridgeError::DuplicateExecution(id)) if id == "dup"
        ));
    }

    #[tokio::test]
    async fn test_garbage_and_anonymous_errors_are_dropped() {
        let (bridge, _req_rx, resp_tx) = connected();
        let mut updates = bridge.execute_pipeline("e2", &steps(), &JsonObject::new()).unwrap();

        resp_tx.send("not a frame".to_string()).unwrap();
        resp_tx
            .send(frame(&RunnerResponse::Error {
                execution_id: None,
                error: "invalid request".into(),
            }))
            .unwrap();
        resp_tx
            .send(frame(&RunnerResponse::Cancelled {
                execution_id: "e2".into(),
            }))
            .unwrap();

        assert_eq!(updates.recv().await, Some(ExecutionUpdate::Cancelled));
        assert_eq!(updates.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancel_removes_entry_and_sends_cancel() {
        let (bridge, mut req_rx, resp_tx) = connected();
        let mut updates = bridge.execute_pipeline("e3", &steps(), &JsonObject::new()).unwrap();
        let _ = req_rx.recv().await;

        assert!(bridge.cancel("e3"));
        assert!(!bridge.cancel("e3"));
        assert_eq!(bridge.in_flight(), 0);

        let sent: RunnerRequest = serde_json::from_str(&req_rx.recv().await.unwrap()).unwrap();
        assert_eq!(sent, RunnerRequest::Cancel { execution_id: "e3".into() });

        // Late events for the cancelled execution never reach the caller
        let late = StepResult::succeeded("a", json!(1), Duration::from_millis(1), 1);
        resp_tx.send(frame(&RunnerResponse::step_complete("e3", late))).unwrap();
        assert_eq!(updates.recv().await, None);
    }

    #[tokio::test]
    async fn test_single_step_entry_dropped_after_step_complete() {
        let (bridge, _req_rx, resp_tx) = connected();
        let step = Step::new("a", "A", StepKind::Full);
        let mut updates = bridge
            .execute_step("s1", &step, &JsonObject::new(), &JsonObject::new())
            .unwrap();

        let result = StepResult::failed("a", "boom", Duration::from_millis(1), 1);
        resp_tx.send(frame(&RunnerResponse::step_complete("s1", result.clone()))).unwrap();

        assert_eq!(updates.recv().await, Some(ExecutionUpdate::StepComplete(result)));
        assert_eq!(updates.recv().await, None);
        assert_eq!(bridge.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_broadcasts_to_all() {
        let (bridge, _req_rx, resp_tx) = connected();
        let mut first = bridge.execute_pipeline("t1", &steps(), &JsonObject::new()).unwrap();
        let mut second = bridge.execute_pipeline("t2", &steps(), &JsonObject::new()).unwrap();

        drop(resp_tx);

        for updates in [&mut first, &mut second] {
            match updates.recv().await {
                Some(ExecutionUpdate::Failed { error }) => {
                    assert_eq!(error, "transport error: runner channel closed")
                }
                other => panic!("expected transport failure, got {other:?}"),
            }
        }
        assert_eq!(bridge.in_flight(), 0);
        assert!(!bridge.is_initialized());
    }

    #[tokio::test]
    async fn test_terminate_clears_registry() {
        let (bridge, mut req_rx, _resp_tx) = connected();
        let mut updates = bridge.execute_pipeline("x", &steps(), &JsonObject::new()).unwrap();

        bridge.terminate();

        assert!(!bridge.is_initialized());
        assert_eq!(bridge.in_flight(), 0);
        assert_eq!(updates.recv().await, None);
        let _ = req_rx.recv().await;
        assert_eq!(req_rx.recv().await, None);
    }
}
