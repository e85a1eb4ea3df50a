//! Step executor abstraction
//!
//! A step executor performs the actual analysis for one [`StepKind`]. The
//! engine never looks inside a step's work: it looks the executor up by kind,
//! races it against the step's timeout and retries it within the budget.
//!
//! [`StepKind`]: stationflow_schemas::StepKind

mod context;
mod definition;
mod registry;

pub use context::StepContext;
pub use definition::{StepError, StepExecutor, StepInput};
pub use registry::StepExecutorRegistry;
