//! Services handed to the execution pool and not yet completed

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{Service, ServiceId};

#[derive(Default)]
pub struct PendingSet {
    services: HashMap<ServiceId, Arc<dyn Service>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, service: Arc<dyn Service>) {
        self.services.insert(service.id(), service);
    }

    /// False if absent, which for a completion means the check ran out of band
    pub fn remove(&mut self, id: &ServiceId) -> bool {
        self.services.remove(id).is_some()
    }

    pub fn contains(&self, id: &ServiceId) -> bool {
        self.services.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
