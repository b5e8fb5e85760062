//! Event types for the LinkQ platform.
//!
//! Defines the signals exchanged between the registration directory, the
//! notification subsystem and the downlink queue core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Endpoint identifier - an opaque string key naming a device registration.
pub type EndpointId = String;

/// How an endpoint expects downlink traffic to reach it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
    /// Endpoint is only intermittently reachable. Downlink requests must be
    /// queued and delivered opportunistically when the endpoint wakes up.
    #[default]
    Queued,
    /// Endpoint is continuously reachable and can be addressed directly.
    Direct,
}

impl BindingMode {
    /// Get the binding mode name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Direct => "direct",
        }
    }
}

impl std::fmt::Display for BindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Events published by LinkQ collaborators.
///
/// The directory publishes registration lifecycle events; the observation
/// subsystem publishes notification events. The downlink queue consumes both
/// to detect when a sleeping endpoint is awake again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LinkqEvent {
    /// A new endpoint registration was created.
    EndpointRegistered {
        endpoint: EndpointId,
        binding: BindingMode,
        timestamp: i64,
    },
    /// An existing registration was refreshed or modified.
    EndpointUpdated {
        endpoint: EndpointId,
        binding: BindingMode,
        timestamp: i64,
    },
    /// A registration was removed; all per-endpoint state must be dropped.
    EndpointUnregistered {
        endpoint: EndpointId,
        timestamp: i64,
    },
    /// A new observation value was reported by the endpoint.
    NotificationReceived {
        endpoint: EndpointId,
        timestamp: i64,
    },
}

impl LinkqEvent {
    /// Get the endpoint this event concerns.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::EndpointRegistered { endpoint, .. }
            | Self::EndpointUpdated { endpoint, .. }
            | Self::EndpointUnregistered { endpoint, .. }
            | Self::NotificationReceived { endpoint, .. } => endpoint,
        }
    }

    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::EndpointRegistered { .. } => "EndpointRegistered",
            Self::EndpointUpdated { .. } => "EndpointUpdated",
            Self::EndpointUnregistered { .. } => "EndpointUnregistered",
            Self::NotificationReceived { .. } => "NotificationReceived",
        }
    }

    /// Whether this event indicates the endpoint is able to receive a
    /// delivery attempt right now.
    ///
    /// Registration events only count as wake signals for queued bindings;
    /// a direct-binding endpoint never goes through the queue.
    pub fn is_wake_signal(&self) -> bool {
        match self {
            Self::EndpointRegistered { binding, .. } | Self::EndpointUpdated { binding, .. } => {
                *binding == BindingMode::Queued
            }
            Self::NotificationReceived { .. } => true,
            Self::EndpointUnregistered { .. } => false,
        }
    }

    /// Whether this event is a registration lifecycle event.
    pub fn is_registry_event(&self) -> bool {
        matches!(
            self,
            Self::EndpointRegistered { .. }
                | Self::EndpointUpdated { .. }
                | Self::EndpointUnregistered { .. }
        )
    }
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID.
    pub event_id: String,
    /// Component that published the event.
    pub source: String,
    /// Publish timestamp.
    pub timestamp: DateTime<Utc>,
}

impl EventMetadata {
    /// Create metadata with the given source.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}
