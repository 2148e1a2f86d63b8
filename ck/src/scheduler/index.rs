//! Due-time index: services awaiting their next check, earliest first

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{Service, ServiceId};

struct Entry {
    /// Due time captured at insertion; the ordering key until the next reinsert
    key: DateTime<Utc>,
    service: Arc<dyn Service>,
}

/// Ordered by `(next_check, id)` with an identity map for O(log n) removal
///
/// Keys are never edited in place. A changed due time is only observed
/// through [`DueTimeIndex::reinsert`], which drops the old key and reads the
/// service's current value.
#[derive(Default)]
pub struct DueTimeIndex {
    order: BTreeSet<(DateTime<Utc>, ServiceId)>,
    entries: HashMap<ServiceId, Entry>,
}

impl DueTimeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service keyed by its current due time
    ///
    /// Inserting an already-indexed service re-keys it. Returns true if the
    /// service was not indexed before.
    pub fn insert(&mut self, service: Arc<dyn Service>) -> bool {
        let id = service.id();
        let fresh = self.remove(&id).is_none();
        let key = service.next_check();
        self.order.insert((key, id));
        self.entries.insert(id, Entry { key, service });
        fresh
    }

    pub fn remove(&mut self, id: &ServiceId) -> Option<Arc<dyn Service>> {
        let entry = self.entries.remove(id)?;
        self.order.remove(&(entry.key, *id));
        Some(entry.service)
    }

    /// Remove and insert again to pick up a changed due time; false if absent
    pub fn reinsert(&mut self, id: &ServiceId) -> bool {
        match self.remove(id) {
            Some(service) => {
                self.insert(service);
                true
            }
            None => false,
        }
    }

    /// The service with the smallest key, ties broken by identity
    pub fn peek_earliest(&self) -> Option<&Arc<dyn Service>> {
        let (_, id) = self.order.first()?;
        self.entries.get(id).map(|e| &e.service)
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
