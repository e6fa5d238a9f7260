use tempo_core::{Duration, Timestamp};
use thiserror::Error;

/// Errors reported by clock operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("cannot move clock backwards from {now} to {target}")]
    TimeWentBackwards { now: Timestamp, target: Timestamp },

    #[error("no pending timers, tickers or deadlines to move to")]
    NoPendingEvents,

    #[error("non-positive interval for ticker: {0}")]
    NonPositiveInterval(Duration),
}

pub type ClockResult<T> = std::result::Result<T, ClockError>;
