//! Pipeline orchestrator
//!
//! The orchestrator owns every [`PipelineExecution`] record. For each run it:
//! - resolves station references against the catalogue into steps
//! - applies skip and priority options and validates the result
//! - picks the delegated runner when it is available and wanted
//! - applies updates from whichever executor runs the steps
//!
//! `run` never fails because of a step. Step failures end up in the record's
//! status, so callers only check that.

mod catalogue;
mod handle;
mod options;

pub use catalogue::{
    default_step_config, SevenStations, StaticCatalogue, StationCatalogue, StationDescriptor,
};
pub use handle::ExecutionHandle;
pub use options::RunOptions;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use stationflow_schemas::{ExecutionStrategy, JsonObject, Step};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bridge::{RunnerBridge, UpdateReceiver};
use crate::config::{PipelineConfig, RunnerMode};
use crate::engine::{resolver, ExecutionUpdate, InContextExecutor};
use crate::error::{BridgeError, OrchestratorError};
use crate::step::StepExecutorRegistry;
use crate::store::{ExecutionStore, PipelineExecution};

/// How to stop an execution that is still running
enum ActiveRoute {
    InContext(CancellationToken),
    Delegated,
}

/// Runs station pipelines and keeps their records
pub struct Orchestrator {
    catalogue: Arc<dyn StationCatalogue>,
    executor: InContextExecutor,
    bridge: Option<RunnerBridge>,
    store: Arc<ExecutionStore>,
    routes: Arc<Mutex<HashMap<String, ActiveRoute>>>,
    config: PipelineConfig,
}

impl Orchestrator {
    /// Create an orchestrator over the seven stations, running in-context
    pub fn new(registry: StepExecutorRegistry, config: PipelineConfig) -> Self {
        let executor =
            InContextExecutor::new(Arc::new(registry)).with_retry_policy(config.retry_policy());

        Self {
            catalogue: Arc::new(SevenStations),
            executor,
            bridge: None,
            store: Arc::new(ExecutionStore::new()),
            routes: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// Create an orchestrator and, when configured, start the delegated runner
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_config(
        registry: StepExecutorRegistry,
        config: PipelineConfig,
    ) -> Result<Self, BridgeError> {
        let orchestrator = Self::new(registry, config);
        match orchestrator.config.runner {
            RunnerMode::Delegated => orchestrator.with_delegated_runner(),
            RunnerMode::InContext => Ok(orchestrator),
        }
    }

    /// Use a different station catalogue
    pub fn with_catalogue(mut self, catalogue: Arc<dyn StationCatalogue>) -> Self {
        self.catalogue = catalogue;
        self
    }

    /// Start a runner thread sharing this orchestrator's executors
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_delegated_runner(self) -> Result<Self, BridgeError> {
        let bridge = RunnerBridge::new();
        bridge.initialize(self.executor.clone())?;
        Ok(self.with_bridge(bridge))
    }

    /// Use an existing bridge for delegated runs
    pub fn with_bridge(mut self, bridge: RunnerBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    pub fn bridge(&self) -> Option<&RunnerBridge> {
        self.bridge.as_ref()
    }

    /// Start a run over the given stations
    ///
    /// Returns as soon as the execution is recorded. Unknown stations, a
    /// malformed dependency graph or a duplicate execution id reject the run
    /// before anything executes.
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self, station_refs, input_data, options), fields(stations = station_refs.len()))]
    pub fn run<S: AsRef<str>>(
        &self,
        station_refs: &[S],
        input_data: JsonObject,
        options: RunOptions,
    ) -> Result<ExecutionHandle, OrchestratorError> {
        let steps = self.resolve(station_refs, &options)?;
        resolver::validate(&steps)?;

        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.config.execution_prefix, Uuid::now_v7()));

        let state = self
            .store
            .insert(PipelineExecution::new(&execution_id, steps.len()))?;
        let handle = ExecutionHandle::new(execution_id.clone(), state);

        let (strategy, updates) = self.dispatch(&execution_id, &steps, input_data, &options);
        info!(%execution_id, %strategy, steps = steps.len(), "execution started");

        // A cancel may land between recording and starting; forward it
        if !self.store.mark_running(&execution_id, strategy) {
            self.stop_route(&execution_id);
        }

        self.spawn_applier(execution_id, updates);
        Ok(handle)
    }

    /// Run every station in the catalogue
    pub fn run_all(
        &self,
        input_data: JsonObject,
        options: RunOptions,
    ) -> Result<ExecutionHandle, OrchestratorError> {
        let ids: Vec<String> = self
            .catalogue
            .get_all_stations()
            .into_iter()
            .map(|station| station.id)
            .collect();
        self.run(&ids, input_data, options)
    }

    /// Run and wait for the terminal state
    pub async fn run_to_completion<S: AsRef<str>>(
        &self,
        station_refs: &[S],
        input_data: JsonObject,
        options: RunOptions,
    ) -> Result<PipelineExecution, OrchestratorError> {
        Ok(self.run(station_refs, input_data, options)?.wait().await)
    }

    pub fn get_execution(&self, execution_id: &str) -> Option<PipelineExecution> {
        self.store.get(execution_id)
    }

    /// Cancel a running execution
    ///
    /// Returns false if the execution is unknown or already terminal.
    /// Otherwise the record is marked cancelled at once and the active
    /// executor is told to stop at its next step boundary.
    #[instrument(skip(self))]
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        if !self.store.mark_cancelled(execution_id) {
            debug!(%execution_id, "nothing to cancel");
            return false;
        }

        self.stop_route(execution_id);
        info!(%execution_id, "execution cancelled");
        true
    }

    /// Remove terminal executions that ended more than `max_age_hours` ago
    pub fn cleanup_old_executions(&self, max_age_hours: u64) -> usize {
        let hours = i64::try_from(max_age_hours).unwrap_or(i64::MAX);
        let cutoff = chrono::Duration::try_hours(hours)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let removed = self.store.remove_ended_before(cutoff);
        if removed > 0 {
            info!(removed, max_age_hours, "cleaned up old executions");
        }
        removed
    }

    /// Executions that have not reached a terminal state
    pub fn get_active_executions(&self) -> Vec<PipelineExecution> {
        self.store.active()
    }

    pub fn get_station_details(&self) -> Vec<StationDescriptor> {
        self.catalogue.get_all_stations()
    }

    /// Stop the runner thread, if any
    ///
    /// Delegated executions still in flight fail with a transport error.
    pub fn shutdown(&self) {
        if let Some(bridge) = &self.bridge {
            bridge.terminate();
        }
        let delegated: Vec<String> = self
            .routes
            .lock()
            .iter()
            .filter(|(_, route)| matches!(route, ActiveRoute::Delegated))
            .map(|(id, _)| id.clone())
            .collect();
        for execution_id in delegated {
            self.store
                .mark_failed(&execution_id, "transport error: runner terminated");
        }
    }

    fn resolve<S: AsRef<str>>(
        &self,
        station_refs: &[S],
        options: &RunOptions,
    ) -> Result<Vec<Step>, OrchestratorError> {
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.step_timeout_ms);
        let retry_budget = options.retry_budget.unwrap_or(self.config.retry_budget);

        let mut steps = station_refs
            .iter()
            .map(|station_ref| {
                let station_ref = station_ref.as_ref();
                self.catalogue
                    .find(station_ref)
                    .map(|station| station.to_step(timeout_ms, retry_budget))
                    .ok_or_else(|| OrchestratorError::UnknownStation(station_ref.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        options.arrange(&mut steps, |step| step.id.as_str());
        Ok(steps)
    }

    /// Hand the steps to an executor and return its update stream
    fn dispatch(
        &self,
        execution_id: &str,
        steps: &[Step],
        input_data: JsonObject,
        options: &RunOptions,
    ) -> (ExecutionStrategy, UpdateReceiver) {
        let wants_delegated = options
            .prefer_delegated
            .unwrap_or(self.config.runner == RunnerMode::Delegated);

        if wants_delegated {
            if let Some(bridge) = self.bridge.as_ref().filter(|b| b.is_initialized()) {
                match bridge.execute_pipeline(execution_id, steps, &input_data) {
                    Ok(updates) => {
                        self.routes
                            .lock()
                            .insert(execution_id.to_string(), ActiveRoute::Delegated);
                        return (ExecutionStrategy::Delegated, updates);
                    }
                    Err(err) => {
                        warn!(%execution_id, error = %err, "delegated runner unavailable, running in-context");
                    }
                }
            }
        }

        let (tx, updates) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.routes.lock().insert(
            execution_id.to_string(),
            ActiveRoute::InContext(cancel.clone()),
        );

        let executor = self.executor.clone();
        let execution_id = execution_id.to_string();
        let steps = steps.to_vec();
        tokio::spawn(async move {
            let outcome = executor
                .execute(&execution_id, &steps, &input_data, &cancel, &tx)
                .await;
            let _ = tx.send(ExecutionUpdate::from(outcome));
        });

        (ExecutionStrategy::InContext, updates)
    }

    /// Apply updates to the record until it is terminal
    fn spawn_applier(&self, execution_id: String, mut updates: UpdateReceiver) {
        let store = self.store.clone();
        let routes = self.routes.clone();

        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                if store.apply(&execution_id, update) {
                    break;
                }
            }

            if store.mark_failed(&execution_id, "execution channel closed") {
                warn!(%execution_id, "update channel closed before a terminal update");
            }
            routes.lock().remove(&execution_id);

            if let Some(execution) = store.get(&execution_id) {
                info!(
                    %execution_id,
                    status = %execution.status,
                    duration_ms = execution.total_duration_ms,
                    "execution finished"
                );
            }
        });
    }

    fn stop_route(&self, execution_id: &str) {
        let route = self.routes.lock().remove(execution_id);
        match route {
            Some(ActiveRoute::InContext(cancel)) => cancel.cancel(),
            Some(ActiveRoute::Delegated) => {
                if let Some(bridge) = &self.bridge {
                    bridge.cancel(execution_id);
                }
            }
            None => {}
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("bridge", &self.bridge)
            .field("store", &self.store)
            .finish()
    }
}
