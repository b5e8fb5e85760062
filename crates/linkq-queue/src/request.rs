//! Downlink request data structures.
//!
//! Defines the core types for queued downlink delivery. The request payload
//! is opaque to the queue: it is carried, never inspected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use linkq_core::EndpointId;

/// Correlation ticket binding a queued request to its eventual resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket(pub Uuid);

impl Ticket {
    /// Generate a fresh ticket.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a caller-supplied ticket.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Downlink operation classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Read a resource value from the device
    Read,
    /// Write a resource value to the device
    Write,
    /// Execute a device operation
    Execute,
    /// Establish or refresh an observation
    Observe,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Execute => write!(f, "execute"),
            Self::Observe => write!(f, "observe"),
        }
    }
}

/// A server-initiated operation toward a device.
///
/// The queue core does not construct, encode or validate these; the caller
/// layer owns the payload semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkRequest {
    /// Operation classification
    pub operation: OperationKind,
    /// Target resource path on the device
    pub path: String,
    /// Opaque operation payload, if any
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl DownlinkRequest {
    /// Create a request without a payload.
    pub fn new(operation: OperationKind, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            payload: None,
        }
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A downlink request held in an endpoint's queue.
///
/// Immutable after creation. Insertion order is delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Destination endpoint
    pub endpoint: EndpointId,
    /// The operation to deliver
    pub request: DownlinkRequest,
    /// Correlation ticket
    pub ticket: Ticket,
    /// When the request was accepted
    pub queued_at: DateTime<Utc>,
}

impl QueuedRequest {
    /// Create a queued request with a fresh ticket.
    pub fn new(endpoint: impl Into<EndpointId>, request: DownlinkRequest) -> Self {
        Self::with_ticket(endpoint, request, Ticket::new())
    }

    /// Create a queued request with a caller-supplied ticket.
    pub fn with_ticket(
        endpoint: impl Into<EndpointId>,
        request: DownlinkRequest,
        ticket: Ticket,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            request,
            ticket,
            queued_at: Utc::now(),
        }
    }
}

/// Response delivered by the device for one downlink request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownlinkResponse {
    /// Opaque response payload, if any
    pub payload: Option<serde_json::Value>,
    /// Human-readable outcome message
    pub message: String,
    /// When the response was produced
    pub completed_at: DateTime<Utc>,
}

impl DownlinkResponse {
    /// Create a successful response without a payload.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            payload: None,
            message: message.into(),
            completed_at: Utc::now(),
        }
    }

    /// Create a successful response with a payload.
    pub fn success_with_payload(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            message: message.into(),
            completed_at: Utc::now(),
        }
    }
}
