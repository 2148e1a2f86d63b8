//! Service lifecycle and schedule events

use std::sync::Arc;

use crate::domain::Service;

/// Events the checker subscribes to
#[derive(Clone)]
pub enum ServiceEvent {
    /// Service became active and should be scheduled
    Activated(Arc<dyn Service>),

    /// Service was deactivated or destroyed
    Deactivated(Arc<dyn Service>),

    /// The service's next due time was modified
    NextCheckChanged(Arc<dyn Service>),
}

impl ServiceEvent {
    /// Get the event type as a string for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Activated(_) => "activated",
            Self::Deactivated(_) => "deactivated",
            Self::NextCheckChanged(_) => "next_check_changed",
        }
    }

    /// The service this event is about
    pub fn service(&self) -> &Arc<dyn Service> {
        match self {
            Self::Activated(s) | Self::Deactivated(s) | Self::NextCheckChanged(s) => s,
        }
    }
}

impl std::fmt::Debug for ServiceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let service = self.service();
        f.debug_struct("ServiceEvent")
            .field("type", &self.event_type())
            .field("service", &service.name())
            .field("id", &service.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryService;

    #[test]
    fn test_event_type_names() {
        let svc: Arc<dyn Service> = MemoryService::builder("web").build();
        assert_eq!(ServiceEvent::Activated(svc.clone()).event_type(), "activated");
        assert_eq!(ServiceEvent::Deactivated(svc.clone()).event_type(), "deactivated");
        assert_eq!(ServiceEvent::NextCheckChanged(svc).event_type(), "next_check_changed");
    }

    #[test]
    fn test_debug_includes_service_name() {
        let svc: Arc<dyn Service> = MemoryService::builder("mail").build();
        let rendered = format!("{:?}", ServiceEvent::Activated(svc));
        assert!(rendered.contains("mail"));
        assert!(rendered.contains("activated"));
    }
}
