//! Delegate transport seam.
//!
//! The queue core never performs the point-to-point exchange itself. It
//! hands each head-of-queue request to a [`DownlinkTransport`] and expects
//! exactly one completion per ticket to arrive later through the
//! [`CompletionSink`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::DownlinkError;
use crate::request::{DownlinkRequest, DownlinkResponse, EndpointId, Ticket};

/// The external collaborator performing the actual network exchange for one
/// request.
#[async_trait]
pub trait DownlinkTransport: Send + Sync {
    /// Submit one request for transmission. Asynchronous: the call returns
    /// once the transport has accepted the request, and the outcome arrives
    /// later as a [`TransportEvent`] for the same ticket.
    ///
    /// An error here means the transport refused the request outright; the
    /// coordinator treats it as a transport-failure completion.
    async fn send(
        &self,
        endpoint: &str,
        request: &DownlinkRequest,
        ticket: Ticket,
    ) -> Result<(), DownlinkError>;

    /// Best-effort cancellation of any in-flight request for the endpoint.
    /// The request may already have been transmitted.
    async fn cancel_pending(&self, endpoint: &str);
}

/// A completed exchange reported by the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// The device answered.
    Response {
        endpoint: EndpointId,
        ticket: Ticket,
        response: DownlinkResponse,
    },
    /// The exchange failed: timeout, protocol error or transport-level
    /// cancellation.
    Failure {
        endpoint: EndpointId,
        ticket: Ticket,
        error: DownlinkError,
    },
}

impl TransportEvent {
    /// The endpoint this completion concerns.
    pub fn endpoint(&self) -> &str {
        match self {
            Self::Response { endpoint, .. } | Self::Failure { endpoint, .. } => endpoint,
        }
    }

    /// The ticket this completion resolves.
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Response { ticket, .. } | Self::Failure { ticket, .. } => *ticket,
        }
    }
}

/// Handle the transport uses to report completions back to the coordinator.
///
/// Cloneable and cheap; reporting never blocks.
#[derive(Clone)]
pub struct CompletionSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl CompletionSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { tx }
    }

    /// Report a successful exchange.
    pub fn report_response(&self, endpoint: impl Into<EndpointId>, ticket: Ticket, response: DownlinkResponse) {
        self.report(TransportEvent::Response {
            endpoint: endpoint.into(),
            ticket,
            response,
        });
    }

    /// Report a failed exchange.
    pub fn report_failure(&self, endpoint: impl Into<EndpointId>, ticket: Ticket, error: DownlinkError) {
        self.report(TransportEvent::Failure {
            endpoint: endpoint.into(),
            ticket,
            error,
        });
    }

    fn report(&self, event: TransportEvent) {
        if self.tx.send(event).is_err() {
            warn!("completion dropped: coordinator is shut down");
        }
    }
}
