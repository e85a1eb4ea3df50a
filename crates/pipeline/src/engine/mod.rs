//! Step execution engine
//!
//! The engine module provides the dependency resolver and the
//! `InContextExecutor`, which drives a step sequence through retries,
//! timeouts and cooperative cancellation.

pub mod resolver;

mod executor;
mod update;

pub use executor::{ExecutionOutcome, InContextExecutor};
pub use update::{ExecutionUpdate, NoopReporter, ProgressReporter};
