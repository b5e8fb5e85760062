//! End-to-end tests for the downlink queue coordinator.
//!
//! A mock transport surfaces every accepted send over a channel so tests can
//! observe delivery order deterministically, and reports completions through
//! the coordinator's completion sink exactly like a real delegate would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use linkq_core::{BindingMode, EventBus, LinkqEvent};
use linkq_queue::{
    CompletionSink, DownlinkCoordinator, DownlinkError, DownlinkRequest, DownlinkResponse,
    DownlinkTransport, EndpointState, InMemoryDirectory, OperationKind, Registration,
    RegistrationDirectory, Ticket,
};

type SendRecord = (String, DownlinkRequest, Ticket);

/// Transport double: records sends, lets the test script completions.
struct MockTransport {
    sends: mpsc::UnboundedSender<SendRecord>,
    sink: RwLock<Option<CompletionSink>>,
    in_flight: Mutex<HashMap<String, Ticket>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockTransport {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SendRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sends: tx,
                sink: RwLock::new(None),
                in_flight: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(Vec::new()),
            }),
            rx,
        )
    }

    fn set_sink(&self, sink: CompletionSink) {
        *self.sink.write().unwrap() = Some(sink);
    }

    fn sink(&self) -> CompletionSink {
        self.sink.read().unwrap().clone().expect("sink not wired")
    }

    fn respond_ok(&self, endpoint: &str, ticket: Ticket, message: &str) {
        self.in_flight.lock().unwrap().remove(endpoint);
        self.sink()
            .report_response(endpoint, ticket, DownlinkResponse::success(message));
    }

    fn fail(&self, endpoint: &str, ticket: Ticket, error: DownlinkError) {
        self.in_flight.lock().unwrap().remove(endpoint);
        self.sink().report_failure(endpoint, ticket, error);
    }

    fn cancelled_endpoints(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownlinkTransport for MockTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &DownlinkRequest,
        ticket: Ticket,
    ) -> Result<(), DownlinkError> {
        self.in_flight
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), ticket);
        self.sends
            .send((endpoint.to_string(), request.clone(), ticket))
            .expect("test dropped the send receiver");
        Ok(())
    }

    async fn cancel_pending(&self, endpoint: &str) {
        self.cancelled.lock().unwrap().push(endpoint.to_string());
        // A well-behaved delegate reports a cancellation failure for the
        // exchange it managed to abort.
        if let Some(ticket) = self.in_flight.lock().unwrap().remove(endpoint) {
            if let Some(sink) = self.sink.read().unwrap().clone() {
                sink.report_failure(endpoint, ticket, DownlinkError::Cancelled);
            }
        }
    }
}

struct Harness {
    coordinator: DownlinkCoordinator,
    transport: Arc<MockTransport>,
    directory: Arc<InMemoryDirectory>,
    bus: EventBus,
    sends: mpsc::UnboundedReceiver<SendRecord>,
}

async fn setup() -> Harness {
    let bus = EventBus::new();
    let directory = Arc::new(InMemoryDirectory::with_event_bus(bus.clone()));
    let (transport, sends) = MockTransport::new();
    let coordinator =
        DownlinkCoordinator::new(transport.clone(), directory.clone(), bus.clone());
    transport.set_sink(coordinator.completion_sink());
    coordinator.start().await;

    Harness {
        coordinator,
        transport,
        directory,
        bus,
        sends,
    }
}

fn read(path: &str) -> DownlinkRequest {
    DownlinkRequest::new(OperationKind::Read, path)
}

async fn expect_send(rx: &mut mpsc::UnboundedReceiver<SendRecord>) -> SendRecord {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a delivery attempt")
        .expect("send channel closed")
}

async fn expect_no_send(rx: &mut mpsc::UnboundedReceiver<SendRecord>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(
        rx.try_recv().is_err(),
        "a delivery attempt happened that should not have"
    );
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn fifo_delivery_one_at_a_time() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let b = h.coordinator.submit("dev1", read("/b")).await.unwrap();
    let c = h.coordinator.submit("dev1", read("/c")).await.unwrap();

    // A goes out first; B is never sent while A is outstanding.
    let (_, request, ticket_a) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/a");
    assert_eq!(ticket_a, a.ticket());
    expect_no_send(&mut h.sends).await;

    h.transport.respond_ok("dev1", ticket_a, "a done");
    assert_eq!(a.wait().await.unwrap().message, "a done");

    let (_, request, ticket_b) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/b");
    h.transport.respond_ok("dev1", ticket_b, "b done");
    assert_eq!(b.wait().await.unwrap().message, "b done");

    let (_, request, ticket_c) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/c");
    h.transport.respond_ok("dev1", ticket_c, "c done");
    assert_eq!(c.wait().await.unwrap().message, "c done");

    // Idle after drain: reachable, not delivering or unreachable.
    wait_until(|| h.coordinator.endpoint_state("dev1") == Some(EndpointState::Reachable)).await;
    assert_eq!(h.coordinator.pending_count("dev1"), 0);
    assert_eq!(h.coordinator.stats().unresolved_tickets, 0);
}

#[tokio::test]
async fn timeout_retains_queue_position_and_wake_retries_same_ticket() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let (_, _, ticket) = expect_send(&mut h.sends).await;

    h.transport
        .fail("dev1", ticket, DownlinkError::Timeout { elapsed_ms: 100 });

    wait_until(|| h.coordinator.endpoint_state("dev1") == Some(EndpointState::Unreachable)).await;
    // The request keeps its queue position and the caller is not notified.
    assert_eq!(h.coordinator.pending_count("dev1"), 1);
    assert_eq!(h.coordinator.stats().unresolved_tickets, 1);
    expect_no_send(&mut h.sends).await;

    // A registration update is a wake signal: the same request is retried.
    h.directory.update("dev1").await;
    let (_, request, retried) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/a");
    assert_eq!(retried, ticket);

    h.transport.respond_ok("dev1", retried, "finally");
    assert_eq!(a.wait().await.unwrap().message, "finally");
    wait_until(|| h.coordinator.endpoint_state("dev1") == Some(EndpointState::Reachable)).await;
}

#[tokio::test]
async fn notification_wake_signal_resumes_delivery() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let (_, _, ticket) = expect_send(&mut h.sends).await;
    h.transport
        .fail("dev1", ticket, DownlinkError::Timeout { elapsed_ms: 100 });
    wait_until(|| h.coordinator.endpoint_state("dev1") == Some(EndpointState::Unreachable)).await;

    // A new observation value proves the endpoint is awake.
    h.bus
        .publish(LinkqEvent::NotificationReceived {
            endpoint: "dev1".to_string(),
            timestamp: 0,
        })
        .await;

    let (_, _, retried) = expect_send(&mut h.sends).await;
    assert_eq!(retried, ticket);
    h.transport.respond_ok("dev1", retried, "ok");
    assert!(a.wait().await.is_ok());
}

#[tokio::test]
async fn cancel_all_resolves_pending_and_returns_reachable() {
    let mut h = setup().await;
    h.directory.register("dev2", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev2", read("/a")).await.unwrap();
    let b = h.coordinator.submit("dev2", read("/b")).await.unwrap();
    let (_, _, _ticket_a) = expect_send(&mut h.sends).await;

    h.coordinator.cancel_all("dev2").await;

    assert_eq!(a.wait().await.unwrap_err(), DownlinkError::Cancelled);
    assert_eq!(b.wait().await.unwrap_err(), DownlinkError::Cancelled);
    assert_eq!(h.coordinator.pending_count("dev2"), 0);
    assert_eq!(h.transport.cancelled_endpoints(), vec!["dev2".to_string()]);

    wait_until(|| h.coordinator.endpoint_state("dev2") == Some(EndpointState::Reachable)).await;
    assert_eq!(h.coordinator.stats().unresolved_tickets, 0);
}

#[tokio::test]
async fn cancellation_wins_over_concurrent_timeout() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let (_, _, ticket) = expect_send(&mut h.sends).await;

    // Cancel first; the transport's timeout report for the same exchange
    // arrives afterwards and must not strand the endpoint as unreachable.
    h.coordinator.cancel_all("dev1").await;
    h.transport
        .fail("dev1", ticket, DownlinkError::Timeout { elapsed_ms: 100 });

    assert_eq!(a.wait().await.unwrap_err(), DownlinkError::Cancelled);
    assert_eq!(h.coordinator.pending_count("dev1"), 0);
    wait_until(|| h.coordinator.endpoint_state("dev1") == Some(EndpointState::Reachable)).await;

    // The endpoint is immediately usable again.
    let d = h.coordinator.submit("dev1", read("/d")).await.unwrap();
    let (_, request, ticket_d) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/d");
    h.transport.respond_ok("dev1", ticket_d, "ok");
    assert!(d.wait().await.is_ok());
}

#[tokio::test]
async fn transport_error_surfaces_and_queue_advances() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let b = h.coordinator.submit("dev1", read("/b")).await.unwrap();

    let (_, _, ticket_a) = expect_send(&mut h.sends).await;
    h.transport.fail(
        "dev1",
        ticket_a,
        DownlinkError::Transport("request rejected".to_string()),
    );

    // The error reaches the caller and the next request goes out.
    assert!(matches!(
        a.wait().await.unwrap_err(),
        DownlinkError::Transport(_)
    ));
    let (_, request, ticket_b) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/b");
    h.transport.respond_ok("dev1", ticket_b, "ok");
    assert!(b.wait().await.is_ok());
}

/// Directory double whose registrations can vanish without any event being
/// published, exposing the delivery-time registration check.
struct VanishingDirectory {
    gone: AtomicBool,
}

#[async_trait]
impl RegistrationDirectory for VanishingDirectory {
    async fn registration(&self, endpoint: &str) -> Option<Registration> {
        if self.gone.load(Ordering::SeqCst) {
            None
        } else {
            Some(Registration::new(endpoint, BindingMode::Queued))
        }
    }
}

#[tokio::test]
async fn registration_gone_at_delivery_time_resolves_pending() {
    let directory = Arc::new(VanishingDirectory {
        gone: AtomicBool::new(false),
    });
    let (transport, mut sends) = MockTransport::new();
    let coordinator =
        DownlinkCoordinator::new(transport.clone(), directory.clone(), EventBus::new());
    transport.set_sink(coordinator.completion_sink());
    coordinator.start().await;

    let a = coordinator.submit("dev1", read("/a")).await.unwrap();
    let b = coordinator.submit("dev1", read("/b")).await.unwrap();
    let (_, _, ticket_a) = expect_send(&mut sends).await;

    // The registration disappears with no unregister event on the bus.
    directory.gone.store(true, Ordering::SeqCst);
    transport.respond_ok("dev1", ticket_a, "done");

    // The in-flight exchange completes normally; the next delivery attempt
    // finds the registration gone and resolves everything still queued.
    assert_eq!(a.wait().await.unwrap().message, "done");
    assert!(matches!(
        b.wait().await.unwrap_err(),
        DownlinkError::UnknownEndpoint(_)
    ));
    wait_until(|| coordinator.endpoint_state("dev1").is_none()).await;
    assert_eq!(coordinator.pending_count("dev1"), 0);
}

#[tokio::test]
async fn unregistration_resolves_stranded_tickets() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let b = h.coordinator.submit("dev1", read("/b")).await.unwrap();
    let _ = expect_send(&mut h.sends).await;

    h.directory.unregister("dev1").await;

    assert!(matches!(
        a.wait().await.unwrap_err(),
        DownlinkError::UnknownEndpoint(_)
    ));
    assert!(matches!(
        b.wait().await.unwrap_err(),
        DownlinkError::UnknownEndpoint(_)
    ));
    wait_until(|| h.coordinator.endpoint_state("dev1").is_none()).await;
    assert_eq!(h.coordinator.pending_count("dev1"), 0);
}

#[tokio::test]
async fn exactly_once_resolution_under_cancel_and_completion_race() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let (_, _, ticket) = expect_send(&mut h.sends).await;

    // Natural completion and cancellation race for the same ticket.
    let transport = h.transport.clone();
    let respond = tokio::spawn(async move {
        transport.respond_ok("dev1", ticket, "raced");
    });
    h.coordinator.cancel_all("dev1").await;
    respond.await.unwrap();

    // Whichever side won, the caller hears back exactly once.
    match a.wait().await {
        Ok(response) => assert_eq!(response.message, "raced"),
        Err(err) => assert_eq!(err, DownlinkError::Cancelled),
    }

    wait_until(|| {
        let stats = h.coordinator.stats();
        stats.unresolved_tickets == 0 && stats.total_pending == 0
    })
    .await;
}

#[tokio::test]
async fn submit_after_drain_restarts_delivery() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let (_, _, ticket) = expect_send(&mut h.sends).await;
    h.transport.respond_ok("dev1", ticket, "ok");
    assert!(a.wait().await.is_ok());
    wait_until(|| h.coordinator.endpoint_state("dev1") == Some(EndpointState::Reachable)).await;

    // A fresh submit on the now-idle endpoint starts a new delivery.
    let b = h.coordinator.submit("dev1", read("/b")).await.unwrap();
    let (_, request, ticket_b) = expect_send(&mut h.sends).await;
    assert_eq!(request.path, "/b");
    h.transport.respond_ok("dev1", ticket_b, "ok");
    assert!(b.wait().await.is_ok());
}

#[tokio::test]
async fn endpoints_deliver_independently() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;
    h.directory.register("dev2", BindingMode::Queued).await;

    let _a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let _x = h.coordinator.submit("dev2", read("/x")).await.unwrap();

    // Both endpoints get an in-flight delivery without waiting on each
    // other.
    let first = expect_send(&mut h.sends).await;
    let second = expect_send(&mut h.sends).await;
    let mut endpoints = vec![first.0, second.0];
    endpoints.sort();
    assert_eq!(endpoints, vec!["dev1".to_string(), "dev2".to_string()]);
}

#[tokio::test]
async fn shutdown_drains_outstanding_work() {
    let mut h = setup().await;
    h.directory.register("dev1", BindingMode::Queued).await;

    let a = h.coordinator.submit("dev1", read("/a")).await.unwrap();
    let (_, _, ticket) = expect_send(&mut h.sends).await;
    h.transport.respond_ok("dev1", ticket, "ok");
    assert!(a.wait().await.is_ok());

    h.coordinator.shutdown().await;
}
