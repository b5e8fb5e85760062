//! Per-endpoint FIFO store for pending downlink requests.
//!
//! Pure in-memory structure: no network I/O, no blocking. Per-endpoint
//! queues are created lazily on first enqueue and detached atomically on
//! cancellation. A persistent variant is a drop-in replacement as long as it
//! preserves add / peek_head / remove_head / remove_all.

use std::collections::VecDeque;

use dashmap::DashMap;
use linkq_core::EndpointId;

use crate::error::DownlinkError;
use crate::request::{QueuedRequest, Ticket};

/// Default cap on pending requests per endpoint.
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// Ordered collections of pending requests, keyed by endpoint.
pub struct RequestStore {
    queues: DashMap<EndpointId, VecDeque<QueuedRequest>>,
    max_pending: usize,
}

impl RequestStore {
    /// Create a store with the default per-endpoint cap.
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    /// Create a store with a custom per-endpoint cap.
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            queues: DashMap::new(),
            max_pending,
        }
    }

    /// Append a request to its endpoint's queue, creating the queue if
    /// absent. Rejects with [`DownlinkError::QueueFull`] past the cap.
    pub fn add(&self, request: QueuedRequest) -> Result<(), DownlinkError> {
        let mut queue = self.queues.entry(request.endpoint.clone()).or_default();
        if queue.len() >= self.max_pending {
            return Err(DownlinkError::QueueFull(request.endpoint.clone()));
        }
        queue.push_back(request);
        Ok(())
    }

    /// The oldest pending request for the endpoint, if any.
    pub fn peek_head(&self, endpoint: &str) -> Option<QueuedRequest> {
        self.queues
            .get(endpoint)
            .and_then(|queue| queue.front().cloned())
    }

    /// Remove and return the oldest entry. Idempotent when empty.
    pub fn remove_head(&self, endpoint: &str) -> Option<QueuedRequest> {
        self.queues
            .get_mut(endpoint)
            .and_then(|mut queue| queue.pop_front())
    }

    /// Remove the head only if it carries the given ticket.
    ///
    /// Guards the completion path against a queue that was detached and
    /// repopulated while the exchange was in flight: a late completion must
    /// never pop somebody else's request.
    pub fn remove_head_if(&self, endpoint: &str, ticket: Ticket) -> Option<QueuedRequest> {
        let mut queue = self.queues.get_mut(endpoint)?;
        if queue.front().map(|head| head.ticket == ticket).unwrap_or(false) {
            queue.pop_front()
        } else {
            None
        }
    }

    /// Atomically detach and return the endpoint's entire pending
    /// collection, leaving the endpoint with no queue. Used for
    /// cancellation.
    pub fn remove_all(&self, endpoint: &str) -> Vec<QueuedRequest> {
        self.queues
            .remove(endpoint)
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default()
    }

    /// True if the endpoint has no pending requests.
    pub fn is_empty(&self, endpoint: &str) -> bool {
        self.queues
            .get(endpoint)
            .map(|queue| queue.is_empty())
            .unwrap_or(true)
    }

    /// Number of pending requests for the endpoint.
    pub fn pending_count(&self, endpoint: &str) -> usize {
        self.queues.get(endpoint).map(|queue| queue.len()).unwrap_or(0)
    }

    /// Endpoints that currently have at least one pending request.
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.queues
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Total pending requests across all endpoints.
    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}
