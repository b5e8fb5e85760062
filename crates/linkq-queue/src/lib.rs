//! Queue-mode downlink delivery for intermittently reachable endpoints.
//!
//! A server issues downlink operations (read/write/execute/observe) against
//! a device endpoint, but the device may be asleep, behind NAT, or polling
//! infrequently. This crate accepts downlink requests for any endpoint at
//! any time, holds them per endpoint in arrival order, and delivers them one
//! at a time while the endpoint is reachable, resuming automatically when
//! the endpoint signals it is awake again.
//!
//! ## Architecture
//!
//! - [`ReachabilityTracker`]: per-endpoint state machine
//!   (reachable / delivering / unreachable) with guarded atomic transitions.
//! - [`RequestStore`]: per-endpoint FIFO of pending requests.
//! - [`CorrelationTable`]: ticket to pending-resolution mapping; every
//!   ticket resolves exactly once.
//! - [`DownlinkCoordinator`]: the orchestrator wiring the above to the
//!   delegate [`DownlinkTransport`], the [`RegistrationDirectory`] and the
//!   event bus carrying wake signals.
//!
//! Guarantees: strict FIFO per endpoint, at most one in-flight delivery per
//! endpoint, exactly-once resolution per ticket, and race-free cancellation
//! against concurrent enqueue and in-flight delivery.

pub mod config;
pub mod coordinator;
pub mod correlation;
pub mod directory;
pub mod error;
pub mod request;
pub mod store;
pub mod tracker;
pub mod transport;

// Re-exports for convenience
pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorStats, DownlinkCoordinator};
pub use correlation::{CorrelationTable, DownlinkOutcome, PendingResponse};
pub use directory::{InMemoryDirectory, Registration, RegistrationDirectory};
pub use error::DownlinkError;
pub use request::{
    DownlinkRequest, DownlinkResponse, EndpointId, OperationKind, QueuedRequest, Ticket,
};
pub use store::RequestStore;
pub use tracker::{EndpointState, ReachabilityTracker};
pub use transport::{CompletionSink, DownlinkTransport, TransportEvent};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
