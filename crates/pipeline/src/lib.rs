//! # Stationflow Pipeline
//!
//! Runs an ordered sequence of analysis steps ("stations") against a document.
//!
//! ## Features
//!
//! - **Fail-fast validation**: cycles, unknown dependencies and duplicate ids reject a run before any step executes
//! - **Per-step reliability**: timeouts raced per attempt, retries within each step's budget
//! - **Cooperative cancellation**: checked at every step boundary
//! - **Delegated execution**: the same step loop on an isolated runner thread, reached only through JSON frames
//! - **Execution registry**: queryable records with age-based cleanup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                           │
//! │  (resolves stations, owns PipelineExecution records)        │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────┐
//! │    InContextExecutor      │   │        RunnerBridge          │
//! │  (caller's own runtime)   │   │  (JSON frames, per-id routes)│
//! └───────────────────────────┘   └─────────────────────────────┘
//!                                                │
//!                                                ▼
//!                                 ┌─────────────────────────────┐
//!                                 │        Remote runner         │
//!                                 │  (own thread and runtime)    │
//!                                 └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use stationflow_pipeline::prelude::*;
//!
//! let mut registry = StepExecutorRegistry::new();
//! registry.register_fn(StepKind::Characters, |_ctx, input| async move {
//!     Ok(json!({ "inputSize": input.input_data.len() }))
//! });
//!
//! let orchestrator = Orchestrator::from_config(registry, PipelineConfig::from_env()?)?;
//! let execution = orchestrator
//!     .run_to_completion(&["station-1"], input, RunOptions::new())
//!     .await?;
//! assert_eq!(execution.status, ExecutionStatus::Completed);
//! ```

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod reliability;
pub mod step;
pub mod store;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{PipelineConfig, RunnerMode};
    pub use crate::engine::{ExecutionOutcome, ExecutionUpdate, InContextExecutor};
    pub use crate::error::{OrchestratorError, PipelineError, ValidationError};
    pub use crate::orchestrator::{ExecutionHandle, Orchestrator, RunOptions, StationDescriptor};
    pub use crate::reliability::RetryPolicy;
    pub use crate::step::{StepContext, StepError, StepExecutor, StepExecutorRegistry, StepInput};
    pub use crate::store::PipelineExecution;
    pub use async_trait::async_trait;
    pub use serde_json::{json, Value};
    pub use stationflow_schemas::{
        ExecutionStatus, ExecutionStrategy, JsonObject, Step, StepKind, StepResult,
    };
}

// Re-exports
pub use bridge::RunnerBridge;
pub use config::{PipelineConfig, RunnerMode};
pub use engine::{resolver, ExecutionOutcome, ExecutionUpdate, InContextExecutor, ProgressReporter};
pub use error::{BridgeError, OrchestratorError, PipelineError, StoreError, ValidationError};
pub use orchestrator::{
    ExecutionHandle, Orchestrator, RunOptions, SevenStations, StaticCatalogue, StationCatalogue,
    StationDescriptor,
};
pub use reliability::RetryPolicy;
pub use step::{StepContext, StepError, StepExecutor, StepExecutorRegistry, StepInput};
pub use store::{ExecutionStore, PipelineExecution};
