//! Per-attempt timeout enforcement
//!
//! Each attempt races the step's work against its `timeout_ms`. Whichever
//! finishes first decides the attempt. Losing work is dropped at that point,
//! so executors that must not be interrupted should spawn their own tasks.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::step::StepError;

/// Why a single attempt did not produce a value
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AttemptError {
    /// The work did not settle within its limit
    #[error("timed out after {}ms", limit.as_millis())]
    TimedOut { limit: Duration },

    /// The work returned an error
    #[error("{0}")]
    Failed(StepError),
}

impl AttemptError {
    /// Whether another attempt may be made after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TimedOut { .. } => true,
            Self::Failed(err) => err.retryable,
        }
    }
}

/// Result of one raced attempt, with the time it took
#[derive(Debug)]
pub struct TimedAttempt<T> {
    pub outcome: Result<T, AttemptError>,
    pub elapsed: Duration,
}

/// Race `work` against `limit`
///
/// Uses Tokio's clock, so tests running with paused time observe exact
/// durations.
pub async fn race_timeout<T, F>(limit: Duration, work: F) -> TimedAttempt<T>
where
    F: Future<Output = Result<T, StepError>>,
{
    let started = Instant::now();
    let outcome = match tokio::time::timeout(limit, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AttemptError::Failed(err)),
        Err(_) => Err(AttemptError::TimedOut { limit }),
    };

    TimedAttempt {
        outcome,
        elapsed: started.elapsed(),
    }
}
