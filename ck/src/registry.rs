//! In-memory service registry and the source contract the checker consumes

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::{MemoryService, Service, ServiceId};
use crate::events::{EventBus, ServiceEvent};

/// Where the checker gets its services from
///
/// `subscribe` is called once at startup, before `active_services` is scanned,
/// so no activation can slip between the two.
pub trait ServiceSource: Send + Sync {
    /// Snapshot of every currently active service
    fn active_services(&self) -> Vec<Arc<dyn Service>>;

    /// Stream of lifecycle and due-time events
    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent>;
}

/// Owns the set of known services and publishes their lifecycle on an [`EventBus`]
pub struct ServiceRegistry {
    bus: EventBus,
    services: RwLock<HashMap<ServiceId, Arc<MemoryService>>>,
}

impl ServiceRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a service without activating it
    pub fn add(&self, service: Arc<MemoryService>) -> ServiceId {
        let id = service.id();
        debug!(service = %service.name(), %id, "ServiceRegistry::add");
        self.services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, service);
        id
    }

    pub fn get(&self, id: &ServiceId) -> Option<Arc<MemoryService>> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Mark a service active and announce it; no-op if already active
    pub fn activate(&self, id: &ServiceId) -> bool {
        let Some(service) = self.get(id) else {
            debug!(%id, "ServiceRegistry::activate: unknown service");
            return false;
        };
        if service.is_active() {
            return true;
        }

        service.set_active(true);
        info!(service = %service.name(), "Service activated");
        self.bus.emit(ServiceEvent::Activated(service));
        true
    }

    /// Mark a service inactive and announce it
    pub fn deactivate(&self, id: &ServiceId) -> bool {
        let Some(service) = self.get(id) else {
            debug!(%id, "ServiceRegistry::deactivate: unknown service");
            return false;
        };
        if !service.is_active() {
            return true;
        }

        service.set_active(false);
        info!(service = %service.name(), "Service deactivated");
        self.bus.emit(ServiceEvent::Deactivated(service));
        true
    }

    /// Deactivate and forget a service
    pub fn remove(&self, id: &ServiceId) -> Option<Arc<MemoryService>> {
        self.deactivate(id);
        self.services.write().unwrap_or_else(|e| e.into_inner()).remove(id)
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServiceSource for ServiceRegistry {
    fn active_services(&self) -> Vec<Arc<dyn Service>> {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.clone() as Arc<dyn Service>)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.bus.subscribe()
    }
}
