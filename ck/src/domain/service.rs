//! The checkable service contract and an in-memory implementation

use std::sync::{Arc, RwLock, Weak};

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::id::ServiceId;
use crate::events::{EventBus, ServiceEvent};

/// A time window restricting when active checks may run
pub trait TimePeriod: Send + Sync {
    fn is_inside(&self, at: DateTime<Utc>) -> bool;
}

/// A monitorable object with a recurring check schedule
///
/// The scheduler holds only shared references; the owner (usually a
/// [`crate::ServiceRegistry`]) decides when a service becomes active.
pub trait Service: Send + Sync {
    fn id(&self) -> ServiceId;

    /// Human-readable name for diagnostics
    fn name(&self) -> &str;

    fn next_check(&self) -> DateTime<Utc>;

    fn set_next_check(&self, at: DateTime<Utc>);

    /// One-shot override: run on the next opportunity regardless of
    /// enablement and check period
    fn force_next_check(&self) -> bool;

    fn set_force_next_check(&self, forced: bool);

    fn enable_active_checks(&self) -> bool;

    fn check_period(&self) -> Option<Arc<dyn TimePeriod>>;

    fn is_active(&self) -> bool;

    /// Recompute the next due time from the service's own schedule
    ///
    /// Also called for services this node is not authoritative for, so a
    /// skipped service moves forward instead of staying due.
    fn update_next_check(&self);
}

impl std::fmt::Debug for dyn Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("next_check", &self.next_check())
            .finish()
    }
}

/// Daily time-of-day window in UTC, `[start, end)`
///
/// A window whose end is before its start wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Parse `"HH:MM"` bounds
    pub fn parse(start: &str, end: &str) -> eyre::Result<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M")
            .map_err(|e| eyre::eyre!("Invalid window start '{}': {}", start, e))?;
        let end =
            NaiveTime::parse_from_str(end, "%H:%M").map_err(|e| eyre::eyre!("Invalid window end '{}': {}", end, e))?;
        Ok(Self { start, end })
    }
}

impl TimePeriod for DailyWindow {
    fn is_inside(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

#[derive(Debug)]
struct MemoryState {
    next_check: DateTime<Utc>,
    force_next_check: bool,
    enable_active_checks: bool,
    active: bool,
}

/// Service whose schedule lives in memory and advances by a fixed interval
///
/// When built with an [`EventBus`], every due-time change is published as
/// [`ServiceEvent::NextCheckChanged`].
pub struct MemoryService {
    id: ServiceId,
    name: String,
    interval: TimeDelta,
    check_period: Option<Arc<dyn TimePeriod>>,
    state: RwLock<MemoryState>,
    bus: Option<EventBus>,
    this: Weak<MemoryService>,
}

impl MemoryService {
    pub fn builder(name: impl Into<String>) -> MemoryServiceBuilder {
        MemoryServiceBuilder {
            name: name.into(),
            interval: TimeDelta::seconds(60),
            next_check: None,
            enable_active_checks: true,
            force_next_check: false,
            check_period: None,
            bus: None,
        }
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    /// Flip the lifecycle flag; the registry emits the matching event
    pub fn set_active(&self, active: bool) {
        self.write().active = active;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Service for MemoryService {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn next_check(&self) -> DateTime<Utc> {
        self.read().next_check
    }

    fn set_next_check(&self, at: DateTime<Utc>) {
        self.write().next_check = at;

        if let (Some(bus), Some(this)) = (&self.bus, self.this.upgrade()) {
            bus.emit(ServiceEvent::NextCheckChanged(this));
        }
    }

    fn force_next_check(&self) -> bool {
        self.read().force_next_check
    }

    fn set_force_next_check(&self, forced: bool) {
        self.write().force_next_check = forced;
    }

    fn enable_active_checks(&self) -> bool {
        self.read().enable_active_checks
    }

    fn check_period(&self) -> Option<Arc<dyn TimePeriod>> {
        self.check_period.clone()
    }

    fn is_active(&self) -> bool {
        self.read().active
    }

    fn update_next_check(&self) {
        let now = Utc::now();
        let next = now.checked_add_signed(self.interval).unwrap_or_else(|| {
            warn!(service = %self.name, interval = %self.interval, "Check interval overflows, parking service");
            DateTime::<Utc>::MAX_UTC
        });
        debug!(service = %self.name, %next, "MemoryService::update_next_check");
        self.set_next_check(next);
    }
}

/// Builder for [`MemoryService`]
pub struct MemoryServiceBuilder {
    name: String,
    interval: TimeDelta,
    next_check: Option<DateTime<Utc>>,
    enable_active_checks: bool,
    force_next_check: bool,
    check_period: Option<Arc<dyn TimePeriod>>,
    bus: Option<EventBus>,
}

impl MemoryServiceBuilder {
    pub fn interval(mut self, interval: TimeDelta) -> Self {
        self.interval = interval;
        self
    }

    /// Initial due time (default: now)
    pub fn next_check(mut self, at: DateTime<Utc>) -> Self {
        self.next_check = Some(at);
        self
    }

    pub fn enable_active_checks(mut self, enabled: bool) -> Self {
        self.enable_active_checks = enabled;
        self
    }

    pub fn force_next_check(mut self, forced: bool) -> Self {
        self.force_next_check = forced;
        self
    }

    pub fn check_period(mut self, period: Arc<dyn TimePeriod>) -> Self {
        self.check_period = Some(period);
        self
    }

    pub fn bus(mut self, bus: &EventBus) -> Self {
        self.bus = Some(bus.clone());
        self
    }

    pub fn build(self) -> Arc<MemoryService> {
        Arc::new_cyclic(|this| MemoryService {
            id: ServiceId::new(),
            name: self.name,
            interval: self.interval,
            check_period: self.check_period,
            state: RwLock::new(MemoryState {
                next_check: self.next_check.unwrap_or_else(Utc::now),
                force_next_check: self.force_next_check,
                enable_active_checks: self.enable_active_checks,
                active: false,
            }),
            bus: self.bus,
            this: this.clone(),
        })
    }
}
