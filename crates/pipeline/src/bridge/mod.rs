//! Delegated execution
//!
//! [`RunnerBridge`] is the caller's side: it owns the channel and routes
//! responses per execution. The runner side lives on its own thread and is
//! reached only through JSON frames.

mod channel;
mod runner;

pub use channel::{RunnerBridge, UpdateReceiver};
pub use runner::{spawn_runner, RUNNER_THREAD_NAME};
