//! Checker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Interval between pending/idle heartbeat reports, in seconds
    #[serde(rename = "heartbeat-interval-secs", default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Role passed to the authority oracle
    #[serde(rename = "authority-role", default = "default_authority_role")]
    pub authority_role: String,

    /// Capacity of the service event bus
    #[serde(rename = "event-capacity", default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_authority_role() -> String {
    "checker".to_string()
}

fn default_event_capacity() -> usize {
    crate::events::DEFAULT_CHANNEL_CAPACITY
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            authority_role: default_authority_role(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl CheckerConfig {
    /// Get the heartbeat interval as a Duration
    ///
    /// Clamped to at least one second; tokio intervals reject zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}
