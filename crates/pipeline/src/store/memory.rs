//! In-memory execution store

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use stationflow_schemas::ExecutionStrategy;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::PipelineExecution;
use crate::engine::ExecutionUpdate;
use crate::error::StoreError;

/// Stored execution plus the monotonic clock it is timed against
struct Entry {
    state: watch::Sender<PipelineExecution>,
    clock: Instant,
}

impl Entry {
    fn snapshot(&self) -> PipelineExecution {
        self.state.borrow().clone()
    }

    fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }
}

/// Registry of pipeline executions
///
/// Each record lives behind a `watch` channel so handles can observe it
/// change. Records stay until removed by an age-based cleanup.
#[derive(Default)]
pub struct ExecutionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record; ids are unique for the life of the store
    pub fn insert(
        &self,
        execution: PipelineExecution,
    ) -> Result<watch::Receiver<PipelineExecution>, StoreError> {
        let mut entries = self.entries.write();
        if entries.contains_key(&execution.id) {
            return Err(StoreError::Duplicate(execution.id));
        }

        let id = execution.id.clone();
        let (state, receiver) = watch::channel(execution);
        entries.insert(
            id,
            Entry {
                state,
                clock: Instant::now(),
            },
        );
        Ok(receiver)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<PipelineExecution> {
        self.entries.read().get(id).map(Entry::snapshot)
    }

    /// Watch a record for changes
    pub fn subscribe(&self, id: &str) -> Option<watch::Receiver<PipelineExecution>> {
        self.entries.read().get(id).map(|entry| entry.state.subscribe())
    }

    /// `pending -> running`; returns whether the status changed
    pub fn mark_running(&self, id: &str, strategy: ExecutionStrategy) -> bool {
        self.modify(id, |execution, _| execution.start(strategy))
    }

    /// Apply an update; returns whether it made the record terminal
    pub fn apply(&self, id: &str, update: ExecutionUpdate) -> bool {
        self.modify(id, |execution, elapsed| execution.apply(update, elapsed))
    }

    /// Move a non-terminal record to `cancelled`
    pub fn mark_cancelled(&self, id: &str) -> bool {
        self.apply(id, ExecutionUpdate::Cancelled)
    }

    /// Move a non-terminal record to `failed`
    pub fn mark_failed(&self, id: &str, error: impl Into<String>) -> bool {
        self.apply(
            id,
            ExecutionUpdate::Failed {
                error: error.into(),
            },
        )
    }

    /// Records that have not reached a terminal state, oldest first
    pub fn active(&self) -> Vec<PipelineExecution> {
        let mut active: Vec<_> = self
            .entries
            .read()
            .values()
            .map(Entry::snapshot)
            .filter(|execution| !execution.is_terminal())
            .collect();
        active.sort_by_key(|execution| execution.started_at);
        active
    }

    /// All records, oldest first
    pub fn list(&self) -> Vec<PipelineExecution> {
        let mut all: Vec<_> = self.entries.read().values().map(Entry::snapshot).collect();
        all.sort_by_key(|execution| execution.started_at);
        all
    }

    /// Remove terminal records that ended before `cutoff`
    ///
    /// Non-terminal records are never removed, however old.
    pub fn remove_ended_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            let execution = entry.state.borrow();
            !(execution.is_terminal() && execution.ended_at.is_some_and(|ended| ended < cutoff))
        });
        let removed = before - entries.len();
        debug!(removed, %cutoff, "removed ended executions");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn modify<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut PipelineExecution, Duration) -> bool,
    {
        let entries = self.entries.read();
        let Some(entry) = entries.get(id) else {
            return false;
        };

        let elapsed = entry.elapsed();
        let mut changed = false;
        entry.state.send_modify(|execution| changed = f(execution, elapsed));
        changed
    }
}

impl std::fmt::Debug for ExecutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStore")
            .field("executions", &self.len())
            .finish()
    }
}
