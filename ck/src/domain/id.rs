//! Service identity

use uuid::Uuid;

/// Stable, unique identity of a service
///
/// Ordering is used as the tie-breaker when two services share a due time,
/// so it must stay fixed for the lifetime of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Generate a fresh, time-ordered ID
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ServiceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
