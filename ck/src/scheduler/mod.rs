//! Check scheduler
//!
//! Keeps active services in a due-time index, dispatches each one to the
//! execution pool when it falls due, and reindexes it when the check completes.

mod config;
mod core;
mod heartbeat;
mod index;
mod pending;

pub use config::CheckerConfig;
pub use self::core::{Checker, CheckerStats};
pub use index::DueTimeIndex;
pub use pending::PendingSet;
