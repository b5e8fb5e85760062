//! LinkQ core types and event wiring.
//!
//! This crate carries the shared vocabulary of the LinkQ platform:
//!
//! - **Events**: registration lifecycle and notification signals
//!   ([`LinkqEvent`]) published by the directory and observation
//!   collaborators.
//! - **EventBus**: the broadcast channel all components communicate over.
//!
//! The downlink queue core (`linkq-queue`) subscribes to this bus to learn
//! when an intermittently-reachable endpoint is awake.

pub mod event;
pub mod eventbus;

pub use event::{BindingMode, EndpointId, EventMetadata, LinkqEvent};
pub use eventbus::{
    EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver, SharedEventBus,
    DEFAULT_CHANNEL_CAPACITY,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
