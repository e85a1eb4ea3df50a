//! Reliability patterns for step execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Delay schedule between attempts
//! - [`race_timeout`] - Per-attempt timeout race

mod retry;
mod timeout;

pub use retry::RetryPolicy;
pub use timeout::{race_timeout, AttemptError, TimedAttempt};
