//! Per-endpoint reachability state machine.
//!
//! The tracker is the synchronization primitive that guarantees at most one
//! in-flight delivery per endpoint without a lock around the whole pipeline.
//! Every transition is a guarded compare-and-swap executed under the map's
//! per-key entry lock; no transition ever blocks.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use linkq_core::EndpointId;
use serde::{Deserialize, Serialize};

/// Reachability state of one endpoint.
///
/// An endpoint absent from the tracker is treated as [`Reachable`] with no
/// history.
///
/// [`Reachable`]: EndpointState::Reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointState {
    /// Believed online, no delivery currently in flight.
    Reachable,
    /// Exactly one request is being transmitted or awaiting its response.
    Delivering,
    /// Last delivery attempt timed out; no further delivery until a wake
    /// signal arrives.
    Unreachable,
}

impl EndpointState {
    /// Get the state name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Reachable => "reachable",
            Self::Delivering => "delivering",
            Self::Unreachable => "unreachable",
        }
    }
}

impl std::fmt::Display for EndpointState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Tracks reachability per endpoint with atomic guarded transitions.
#[derive(Default)]
pub struct ReachabilityTracker {
    states: DashMap<EndpointId, EndpointState>,
}

impl ReachabilityTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// `Delivering -> Unreachable`. Returns false from any other state:
    /// a delivery timeout is only meaningful if a delivery was in flight.
    pub fn mark_unreachable(&self, endpoint: &str) -> bool {
        self.transition(endpoint, EndpointState::Delivering, EndpointState::Unreachable)
    }

    /// `Unreachable -> Reachable`, or inserts `Reachable` for an endpoint
    /// with no recorded state. Returns whether a transition happened.
    pub fn mark_reachable(&self, endpoint: &str) -> bool {
        match self.states.entry(endpoint.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == EndpointState::Unreachable {
                    *entry.get_mut() = EndpointState::Reachable;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(EndpointState::Reachable);
                true
            }
        }
    }

    /// `Reachable -> Delivering`. An absent endpoint counts as `Reachable`.
    ///
    /// Returns whether the transition succeeded; failure means another
    /// delivery is already in flight or the endpoint is unreachable, and the
    /// caller must not send.
    pub fn start_delivering(&self, endpoint: &str) -> bool {
        match self.states.entry(endpoint.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() == EndpointState::Reachable {
                    *entry.get_mut() = EndpointState::Delivering;
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(EndpointState::Delivering);
                true
            }
        }
    }

    /// `Delivering -> Reachable` (queue drained, nothing left to send).
    pub fn stop_delivering(&self, endpoint: &str) -> bool {
        self.transition(endpoint, EndpointState::Delivering, EndpointState::Reachable)
    }

    /// Remove all state for the endpoint (deregistration).
    pub fn clear(&self, endpoint: &str) {
        self.states.remove(endpoint);
    }

    /// Current recorded state, if any.
    pub fn state(&self, endpoint: &str) -> Option<EndpointState> {
        self.states.get(endpoint).map(|s| *s)
    }

    /// Number of endpoints with recorded state.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the tracker holds no state at all.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Count endpoints currently in the given state.
    pub fn count_in_state(&self, state: EndpointState) -> usize {
        self.states.iter().filter(|entry| *entry.value() == state).count()
    }

    fn transition(&self, endpoint: &str, from: EndpointState, to: EndpointState) -> bool {
        match self.states.get_mut(endpoint) {
            Some(mut entry) => {
                if *entry == from {
                    *entry = to;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }
}
