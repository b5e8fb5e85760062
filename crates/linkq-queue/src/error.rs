//! Error taxonomy for queued downlink delivery.

use linkq_core::EndpointId;

/// Errors surfaced to a downlink caller or produced inside the queue core.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DownlinkError {
    /// The delegate transport reported no response within its deadline.
    /// Recovered locally: the endpoint is marked unreachable and the request
    /// stays at the head of its queue until the next wake signal.
    #[error("delivery timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The delegate reported a definite failure (rejected or malformed
    /// exchange). Surfaced immediately; the queue advances.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request was cancelled by an explicit cancel-all call.
    #[error("request cancelled")]
    Cancelled,

    /// The endpoint is not, or is no longer, registered.
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    /// The endpoint's pending queue is at capacity.
    #[error("downlink queue full for endpoint: {0}")]
    QueueFull(EndpointId),

    /// The requested call shape is not available for queued bindings.
    #[error("operation unsupported: {0}")]
    OperationUnsupported(String),

    /// Unexpected failure inside a queue task. Logged and converted, never
    /// propagated past the task boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DownlinkError {
    /// Whether this error is timeout-classified.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error is cancellation-classified.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
