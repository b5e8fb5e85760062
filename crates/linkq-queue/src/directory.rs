//! Registration directory seam.
//!
//! The directory owns endpoint registrations and their binding metadata.
//! The queue core only looks registrations up; liveness changes travel as
//! [`LinkqEvent`]s on the event bus.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use linkq_core::{BindingMode, EndpointId, EventBus, LinkqEvent};

/// A device endpoint's current registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Endpoint identifier
    pub endpoint: EndpointId,
    /// Declared binding mode
    pub binding: BindingMode,
    /// When the registration was created
    pub registered_at: DateTime<Utc>,
    /// When the registration was last refreshed
    pub last_update: DateTime<Utc>,
}

impl Registration {
    /// Create a fresh registration.
    pub fn new(endpoint: impl Into<EndpointId>, binding: BindingMode) -> Self {
        let now = Utc::now();
        Self {
            endpoint: endpoint.into(),
            binding,
            registered_at: now,
            last_update: now,
        }
    }

    /// Whether downlinks for this endpoint must go through the queue.
    pub fn uses_queue_mode(&self) -> bool {
        self.binding == BindingMode::Queued
    }
}

/// Lookup interface the queue core depends on.
#[async_trait]
pub trait RegistrationDirectory: Send + Sync {
    /// Current registration for the endpoint, if any.
    async fn registration(&self, endpoint: &str) -> Option<Registration>;
}

/// In-memory directory backed by a concurrent map.
///
/// Registration changes are published as events when the directory is wired
/// to a bus, which is how the queue coordinator learns about wake signals
/// and departures.
pub struct InMemoryDirectory {
    registrations: DashMap<EndpointId, Registration>,
    event_bus: Option<EventBus>,
}

impl InMemoryDirectory {
    /// Create a directory without event publication.
    pub fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            event_bus: None,
        }
    }

    /// Create a directory that publishes registration events on the bus.
    pub fn with_event_bus(event_bus: EventBus) -> Self {
        Self {
            registrations: DashMap::new(),
            event_bus: Some(event_bus),
        }
    }

    /// Create or replace a registration.
    pub async fn register(&self, endpoint: impl Into<EndpointId>, binding: BindingMode) {
        let registration = Registration::new(endpoint, binding);
        let endpoint = registration.endpoint.clone();
        info!(%endpoint, binding = %binding, "endpoint registered");
        self.registrations.insert(endpoint.clone(), registration);

        self.publish(LinkqEvent::EndpointRegistered {
            endpoint,
            binding,
            timestamp: Utc::now().timestamp(),
        })
        .await;
    }

    /// Refresh an existing registration. No-op for unknown endpoints.
    pub async fn update(&self, endpoint: &str) {
        let binding = match self.registrations.get_mut(endpoint) {
            Some(mut registration) => {
                registration.last_update = Utc::now();
                registration.binding
            }
            None => return,
        };

        self.publish(LinkqEvent::EndpointUpdated {
            endpoint: endpoint.to_string(),
            binding,
            timestamp: Utc::now().timestamp(),
        })
        .await;
    }

    /// Remove a registration.
    pub async fn unregister(&self, endpoint: &str) {
        if self.registrations.remove(endpoint).is_none() {
            return;
        }
        info!(%endpoint, "endpoint unregistered");

        self.publish(LinkqEvent::EndpointUnregistered {
            endpoint: endpoint.to_string(),
            timestamp: Utc::now().timestamp(),
        })
        .await;
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether the directory has no registrations.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    async fn publish(&self, event: LinkqEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish_with_source(event, "directory").await;
        }
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegistrationDirectory for InMemoryDirectory {
    async fn registration(&self, endpoint: &str) -> Option<Registration> {
        self.registrations.get(endpoint).map(|r| r.clone())
    }
}
