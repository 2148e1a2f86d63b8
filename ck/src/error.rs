//! Checker error types

use thiserror::Error;

/// Errors returned by the checker's start/stop surface
///
/// Nothing inside the scheduling path is fatal; check failures are logged,
/// never returned.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("Checker is already running")]
    AlreadyStarted,

    #[error("Checker is not running")]
    NotStarted,

    #[error("Scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
