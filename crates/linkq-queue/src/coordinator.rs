//! Downlink queue coordinator.
//!
//! Public entry point of the queue core. Accepts downlink requests for any
//! endpoint at any time, holds them per endpoint in arrival order, and
//! delivers them one at a time while the endpoint is reachable. Delivery
//! resumes automatically when a wake signal (registration event or
//! notification) arrives on the event bus.
//!
//! Control flow: submit -> enqueue -> (if endpoint idle) delivery task ->
//! transport send -> completion -> next delivery task, or idle when the
//! queue drains. All tasks run on the tokio pool; nothing here blocks on
//! network I/O except the bounded drain wait in [`DownlinkCoordinator::shutdown`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use linkq_core::{EventBus, LinkqEvent};

use crate::config::CoordinatorConfig;
use crate::correlation::{CorrelationTable, PendingResponse};
use crate::directory::RegistrationDirectory;
use crate::error::DownlinkError;
use crate::request::{DownlinkRequest, DownlinkResponse, EndpointId, QueuedRequest, Ticket};
use crate::store::RequestStore;
use crate::tracker::{EndpointState, ReachabilityTracker};
use crate::transport::{CompletionSink, DownlinkTransport, TransportEvent};

/// Aggregate view of coordinator state, for diagnostics.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoordinatorStats {
    /// Endpoints currently idle and reachable
    pub reachable: usize,
    /// Endpoints with a delivery in flight
    pub delivering: usize,
    /// Endpoints waiting for a wake signal
    pub unreachable: usize,
    /// Pending requests across all endpoints
    pub total_pending: usize,
    /// Tickets not yet resolved
    pub unresolved_tickets: usize,
}

/// Counts outstanding delivery tasks so shutdown can drain them.
struct TaskGauge {
    active: AtomicUsize,
    notify: Notify,
}

impl TaskGauge {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    fn start(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for the wakeup before re-checking: notify_waiters only
            // reaches already-enabled waiters, so a finish() landing between
            // the re-check and the first poll would otherwise be lost.
            notified.as_mut().enable();
            if self.active.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the gauge when a delivery task exits, normally or not.
struct WorkGuard {
    gauge: Arc<TaskGauge>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.gauge.finish();
    }
}

/// Releases the endpoint's `Delivering` claim unless disarmed.
///
/// Disarmed after a send is accepted (the claim must survive until the
/// completion arrives). If the task exits any other way, the drop releases
/// the claim so the endpoint never deadlocks in `Delivering`.
struct DeliveryClaim<'a> {
    tracker: &'a ReachabilityTracker,
    endpoint: &'a str,
    armed: bool,
}

impl<'a> DeliveryClaim<'a> {
    fn new(tracker: &'a ReachabilityTracker, endpoint: &'a str) -> Self {
        Self {
            tracker,
            endpoint,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DeliveryClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.tracker.stop_delivering(self.endpoint);
        }
    }
}

struct Inner {
    config: CoordinatorConfig,
    transport: Arc<dyn DownlinkTransport>,
    directory: Arc<dyn RegistrationDirectory>,
    event_bus: EventBus,
    tracker: ReachabilityTracker,
    store: RequestStore,
    correlation: CorrelationTable,
    /// Per-endpoint write-preferring lock separating bulk cancellation from
    /// single enqueue. Never held across endpoints.
    cancel_locks: DashMap<EndpointId, Arc<RwLock<()>>>,
    completion_tx: mpsc::UnboundedSender<TransportEvent>,
    in_flight: Arc<TaskGauge>,
}

impl Inner {
    fn cancel_lock(&self, endpoint: &str) -> Arc<RwLock<()>> {
        self.cancel_locks
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    /// Drop an endpoint's cancel lock once nothing else holds it, so the
    /// map does not grow with endpoint churn. The shard lock serializes the
    /// count check against `cancel_lock` handing out a new clone.
    fn prune_cancel_lock(&self, endpoint: &str) {
        self.cancel_locks
            .remove_if(endpoint, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Schedule a delivery task for an endpoint whose `Delivering` claim is
    /// already held.
    fn spawn_delivery(self: &Arc<Self>, endpoint: EndpointId) {
        let inner = Arc::clone(self);
        inner.in_flight.start();
        tokio::spawn(async move {
            let _work = WorkGuard {
                gauge: inner.in_flight.clone(),
            };
            inner.run_delivery(&endpoint).await;
        });
    }

    /// Delivery task: pop nothing, send the head of the queue.
    ///
    /// Precondition: this task owns the endpoint's `Delivering` claim.
    async fn run_delivery(self: &Arc<Self>, endpoint: &str) {
        let mut claim = DeliveryClaim::new(&self.tracker, endpoint);

        let head = match self.store.peek_head(endpoint) {
            Some(head) => head,
            None => {
                debug!(%endpoint, "queue drained, endpoint idle");
                return; // claim drop releases Delivering
            }
        };

        // The endpoint may have deregistered between enqueue and delivery.
        if self.directory.registration(endpoint).await.is_none() {
            claim.disarm();
            self.abandon_endpoint(endpoint).await;
            self.prune_cancel_lock(endpoint);
            return;
        }

        debug!(
            %endpoint,
            ticket = %head.ticket,
            operation = %head.request.operation,
            "delivering head-of-queue request"
        );

        match self
            .transport
            .send(endpoint, &head.request, head.ticket)
            .await
        {
            Ok(()) => {
                // Awaiting the transport's completion; the claim stays held.
                claim.disarm();
            }
            Err(transport_error) => {
                claim.disarm();
                warn!(%endpoint, ticket = %head.ticket, error = %transport_error, "transport rejected request");
                self.handle_completion(TransportEvent::Failure {
                    endpoint: endpoint.to_string(),
                    ticket: head.ticket,
                    error: transport_error,
                })
                .await;
            }
        }
    }

    /// Response completion task: resolve the caller and drive the endpoint's
    /// state machine forward.
    async fn handle_completion(self: &Arc<Self>, event: TransportEvent) {
        let endpoint = event.endpoint().to_string();
        match event {
            TransportEvent::Response {
                ticket, response, ..
            } => {
                debug!(%endpoint, %ticket, "downlink response received");
                self.correlation.resolve(ticket, Ok(response));
                self.store.remove_head_if(&endpoint, ticket);
                self.spawn_delivery(endpoint);
            }
            TransportEvent::Failure { ticket, error, .. } if error.is_cancellation() => {
                // The queue was already cleared and the ticket resolved by
                // the cancelling call; just release the claim.
                self.correlation.resolve(ticket, Err(error));
                self.tracker.stop_delivering(&endpoint);
            }
            TransportEvent::Failure { ticket, error, .. } if error.is_timeout() => {
                if self
                    .store
                    .peek_head(&endpoint)
                    .map(|head| head.ticket == ticket)
                    .unwrap_or(false)
                {
                    // The request keeps its queue position; the next wake
                    // signal retries the same head. The caller is not told.
                    info!(%endpoint, %ticket, "delivery timed out, endpoint marked unreachable");
                    self.tracker.mark_unreachable(&endpoint);
                } else {
                    // The request left the queue while the exchange was in
                    // flight (cancelled or abandoned); cancellation wins.
                    debug!(%endpoint, %ticket, "timeout for a request no longer queued");
                    self.tracker.stop_delivering(&endpoint);
                }
            }
            TransportEvent::Failure { ticket, error, .. } => {
                debug!(%endpoint, %ticket, %error, "downlink failed, advancing queue");
                self.correlation.resolve(ticket, Err(error));
                self.store.remove_head_if(&endpoint, ticket);
                self.spawn_delivery(endpoint);
            }
        }
    }

    /// Wake-signal handling: attempt to restart delivery for the endpoint.
    fn wake(self: &Arc<Self>, endpoint: &str) {
        // mark_reachable may be a no-op when the endpoint was never
        // unreachable; start_delivering can still succeed and cover a fresh
        // registration arriving with a non-empty queue.
        self.tracker.mark_reachable(endpoint);
        if self.tracker.start_delivering(endpoint) {
            debug!(%endpoint, "wake signal accepted, resuming delivery");
            self.spawn_delivery(endpoint.to_string());
        }
    }

    /// Resolve every pending request for an endpoint whose registration is
    /// gone, and drop all per-endpoint state.
    async fn abandon_endpoint(&self, endpoint: &str) {
        let detached = self.store.remove_all(endpoint);
        if !detached.is_empty() {
            warn!(
                %endpoint,
                pending = detached.len(),
                "registration gone, resolving pending requests"
            );
        }
        for request in &detached {
            self.correlation.resolve(
                request.ticket,
                Err(DownlinkError::UnknownEndpoint(endpoint.to_string())),
            );
        }
        self.tracker.clear(endpoint);
    }

    async fn handle_event(self: &Arc<Self>, event: LinkqEvent) {
        if event.is_wake_signal() {
            self.wake(event.endpoint());
            return;
        }
        if let LinkqEvent::EndpointUnregistered { endpoint, .. } = event {
            {
                let lock = self.cancel_lock(&endpoint);
                let _guard = lock.write().await;
                self.abandon_endpoint(&endpoint).await;
            }
            self.prune_cancel_lock(&endpoint);
        }
    }
}

/// Queue-mode downlink coordinator.
///
/// Owns the reachability tracker, the per-endpoint request store, the
/// response correlation table and the per-endpoint cancellation locks. The
/// transport, directory and event bus are injected at construction.
pub struct DownlinkCoordinator {
    inner: Arc<Inner>,
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl DownlinkCoordinator {
    /// Create a coordinator with the default configuration.
    pub fn new(
        transport: Arc<dyn DownlinkTransport>,
        directory: Arc<dyn RegistrationDirectory>,
        event_bus: EventBus,
    ) -> Self {
        Self::with_config(transport, directory, event_bus, CoordinatorConfig::default())
    }

    /// Create a coordinator with a custom configuration.
    pub fn with_config(
        transport: Arc<dyn DownlinkTransport>,
        directory: Arc<dyn RegistrationDirectory>,
        event_bus: EventBus,
        config: CoordinatorConfig,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let store = RequestStore::with_max_pending(config.max_pending_per_endpoint);
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                directory,
                event_bus,
                tracker: ReachabilityTracker::new(),
                store,
                correlation: CorrelationTable::new(),
                cancel_locks: DashMap::new(),
                completion_tx,
                in_flight: Arc::new(TaskGauge::new()),
            }),
            completion_rx: Mutex::new(Some(completion_rx)),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Handle the transport uses to report completions.
    pub fn completion_sink(&self) -> CompletionSink {
        CompletionSink::new(self.inner.completion_tx.clone())
    }

    /// Start the completion and wake loops.
    ///
    /// Requests may be submitted before `start`, but completions and wake
    /// signals are only processed afterwards.
    pub async fn start(&self) {
        let mut rx = match self.completion_rx.lock().await.take() {
            Some(rx) => rx,
            None => {
                warn!("coordinator already started");
                return;
            }
        };

        info!("starting downlink coordinator");

        let inner = Arc::clone(&self.inner);
        let completion_loop = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                inner.handle_completion(event).await;
            }
        });

        let inner = Arc::clone(&self.inner);
        let mut bus_rx = inner.event_bus.subscribe();
        let wake_loop = tokio::spawn(async move {
            while let Some((event, _meta)) = bus_rx.recv().await {
                inner.handle_event(event).await;
            }
        });

        let mut loops = self.loops.lock().await;
        loops.push(completion_loop);
        loops.push(wake_loop);
    }

    /// Submit a downlink request with a generated ticket.
    ///
    /// Returns immediately; the request is stored and, if the endpoint is
    /// idle and reachable, delivery starts. The returned handle resolves
    /// exactly once with the outcome.
    pub async fn submit(
        &self,
        endpoint: &str,
        request: DownlinkRequest,
    ) -> Result<PendingResponse, DownlinkError> {
        self.submit_with_ticket(endpoint, request, Ticket::new()).await
    }

    /// Submit a downlink request with a caller-supplied ticket.
    pub async fn submit_with_ticket(
        &self,
        endpoint: &str,
        request: DownlinkRequest,
        ticket: Ticket,
    ) -> Result<PendingResponse, DownlinkError> {
        let registration = self
            .inner
            .directory
            .registration(endpoint)
            .await
            .ok_or_else(|| DownlinkError::UnknownEndpoint(endpoint.to_string()))?;

        if !registration.uses_queue_mode() {
            return Err(DownlinkError::OperationUnsupported(format!(
                "endpoint {endpoint} does not use a queued binding"
            )));
        }

        let pending = {
            // Hold the read side of the cancel lock across registration and
            // enqueue so a concurrent cancel-all cannot observe a ticket
            // that is registered but not yet queued.
            let lock = self.inner.cancel_lock(endpoint);
            let _guard = lock.read().await;

            let pending = self.inner.correlation.register(ticket);
            let queued = QueuedRequest::with_ticket(endpoint, request, ticket);
            if let Err(full) = self.inner.store.add(queued) {
                self.inner.correlation.resolve(ticket, Err(full.clone()));
                return Err(full);
            }
            pending
        };

        debug!(%endpoint, %ticket, "downlink request queued");

        if self.inner.tracker.start_delivering(endpoint) {
            self.inner.spawn_delivery(endpoint.to_string());
        }

        Ok(pending)
    }

    /// Synchronous block-and-wait delivery is not available for queued
    /// bindings: the device may not respond for hours. Always signals
    /// [`DownlinkError::OperationUnsupported`].
    pub async fn submit_and_wait(
        &self,
        endpoint: &str,
        _request: DownlinkRequest,
    ) -> Result<DownlinkResponse, DownlinkError> {
        Err(DownlinkError::OperationUnsupported(format!(
            "synchronous wait is not supported for queue-mode endpoint {endpoint}; \
             submit and await the pending response instead"
        )))
    }

    /// Cancel every pending request for an endpoint.
    ///
    /// Best-effort for the in-flight request; authoritative for the local
    /// queue: every previously-submitted, unresolved ticket is resolved with
    /// [`DownlinkError::Cancelled`].
    pub async fn cancel_all(&self, endpoint: &str) {
        {
            let lock = self.inner.cancel_lock(endpoint);
            let _guard = lock.write().await;

            self.inner.transport.cancel_pending(endpoint).await;

            let detached = self.inner.store.remove_all(endpoint);
            info!(%endpoint, cancelled = detached.len(), "cancelled pending downlink requests");
            for request in &detached {
                self.inner
                    .correlation
                    .resolve(request.ticket, Err(DownlinkError::Cancelled));
            }

            // An unreachable endpoint with an empty queue is reachable again.
            // A held Delivering claim is released by the in-flight exchange's
            // own completion. An endpoint with no recorded state stays
            // untracked.
            if self.inner.tracker.state(endpoint).is_some() {
                self.inner.tracker.mark_reachable(endpoint);
            }
        }
        self.inner.prune_cancel_lock(endpoint);
    }

    /// Current tracked state for an endpoint, if any.
    pub fn endpoint_state(&self, endpoint: &str) -> Option<EndpointState> {
        self.inner.tracker.state(endpoint)
    }

    /// Number of pending requests for an endpoint.
    pub fn pending_count(&self, endpoint: &str) -> usize {
        self.inner.store.pending_count(endpoint)
    }

    /// Aggregate coordinator statistics.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            reachable: self.inner.tracker.count_in_state(EndpointState::Reachable),
            delivering: self.inner.tracker.count_in_state(EndpointState::Delivering),
            unreachable: self.inner.tracker.count_in_state(EndpointState::Unreachable),
            total_pending: self.inner.store.total_pending(),
            unresolved_tickets: self.inner.correlation.len(),
        }
    }

    /// Stop the loops and drain outstanding delivery tasks, waiting at most
    /// the configured drain timeout. The only blocking wait in this crate.
    pub async fn shutdown(&self) {
        info!("shutting down downlink coordinator");

        let drained = tokio::time::timeout(
            self.inner.config.drain_timeout(),
            self.inner.in_flight.wait_idle(),
        )
        .await;
        if drained.is_err() {
            error!(
                timeout_ms = self.inner.config.drain_timeout_ms,
                "drain timeout expired with delivery tasks still outstanding"
            );
        }

        let mut loops = self.loops.lock().await;
        for handle in loops.drain(..) {
            handle.abort();
        }
    }
}
