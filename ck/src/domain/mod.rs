//! Domain types: service identity and the service contract

mod id;
mod service;

pub use id::ServiceId;
pub use service::{DailyWindow, MemoryService, MemoryServiceBuilder, Service, TimePeriod};
