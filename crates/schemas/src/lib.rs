// Stationflow Schemas
//
// Decision: This crate is the source of truth for values shared between the caller and the runner
// Decision: Minimal dependencies - only serde, serde_json, thiserror
// Decision: No runtime logic - only type definitions and serialization

pub mod execution;
pub mod protocol;
pub mod step;

// Execution types
pub use execution::{ExecutionStatus, ExecutionStrategy};

// Wire protocol
pub use protocol::{RunnerRequest, RunnerResponse, STATUS_FAILED, STATUS_RUNNING, STATUS_STARTED};

// Step types
pub use step::{JsonObject, Step, StepKind, StepResult, UnknownStepKind};
