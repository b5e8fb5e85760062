//! Response correlation table.
//!
//! Maps a correlation ticket to the caller's pending resolution. Callback
//! pairs are expressed as oneshot promises: registering a ticket yields a
//! [`PendingResponse`] the caller can await, and resolving consumes the
//! entry so every ticket is resolved at most once by construction.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::DownlinkError;
use crate::request::{DownlinkResponse, Ticket};

/// Outcome delivered to the original submitter: exactly one per ticket.
pub type DownlinkOutcome = Result<DownlinkResponse, DownlinkError>;

/// A caller's handle to the eventual outcome of one queued request.
#[derive(Debug)]
pub struct PendingResponse {
    ticket: Ticket,
    rx: oneshot::Receiver<DownlinkOutcome>,
}

impl PendingResponse {
    /// The correlation ticket for this request.
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Wait for the outcome. A queued device may not respond for hours;
    /// callers that cannot wait should hold on to the ticket and drop this
    /// handle instead.
    pub async fn wait(self) -> DownlinkOutcome {
        self.rx.await.unwrap_or_else(|_| {
            Err(DownlinkError::Internal(
                "resolution channel closed before the ticket was resolved".to_string(),
            ))
        })
    }

    /// Check for an outcome without waiting.
    pub fn try_wait(&mut self) -> Option<DownlinkOutcome> {
        self.rx.try_recv().ok()
    }
}

/// Table of unresolved tickets.
#[derive(Default)]
pub struct CorrelationTable {
    entries: DashMap<Ticket, oneshot::Sender<DownlinkOutcome>>,
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a ticket and hand back the caller's pending handle.
    ///
    /// Registering the same ticket twice replaces the previous entry; the
    /// old handle resolves as an internal error when its sender is dropped.
    pub fn register(&self, ticket: Ticket) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        if self.entries.insert(ticket, tx).is_some() {
            debug!(%ticket, "replaced existing correlation entry");
        }
        PendingResponse { ticket, rx }
    }

    /// Resolve a ticket with the given outcome.
    ///
    /// The entry is removed atomically and its sender consumed, so a ticket
    /// resolves at most once. Returns false if the ticket was unknown or
    /// already resolved.
    pub fn resolve(&self, ticket: Ticket, outcome: DownlinkOutcome) -> bool {
        match self.entries.remove(&ticket) {
            Some((_, tx)) => {
                // The caller may have dropped its handle; resolution still
                // counts as delivered.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Whether the ticket is still unresolved.
    pub fn contains(&self, ticket: Ticket) -> bool {
        self.entries.contains_key(&ticket)
    }

    /// Number of unresolved tickets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no unresolved tickets.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
