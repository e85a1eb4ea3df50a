//! Execution records and their registry

mod execution;
mod memory;

pub use execution::PipelineExecution;
pub use memory::ExecutionStore;
