//! Queue-mode delivery walkthrough.
//!
//! Simulates a sleepy device: the first delivery attempt times out, the
//! endpoint is parked as unreachable, and a later notification wakes it up
//! so the held request goes through.
//!
//! Run with: cargo run --example queued_delivery

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use linkq_core::{BindingMode, EventBus, LinkqEvent};
use linkq_queue::{
    CompletionSink, DownlinkCoordinator, DownlinkError, DownlinkRequest, DownlinkResponse,
    DownlinkTransport, InMemoryDirectory, OperationKind, Ticket,
};

/// Simulated device link: asleep until told otherwise.
struct SleepyDevice {
    sink: OnceLock<CompletionSink>,
    awake: Mutex<bool>,
}

impl SleepyDevice {
    fn new() -> Self {
        Self {
            sink: OnceLock::new(),
            awake: Mutex::new(false),
        }
    }

    async fn wake_up(&self) {
        *self.awake.lock().await = true;
    }
}

#[async_trait]
impl DownlinkTransport for SleepyDevice {
    async fn send(
        &self,
        endpoint: &str,
        request: &DownlinkRequest,
        ticket: Ticket,
    ) -> Result<(), DownlinkError> {
        let sink = self.sink.get().expect("sink wired before first send").clone();
        let endpoint = endpoint.to_string();
        let path = request.path.clone();
        let awake = *self.awake.lock().await;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if awake {
                info!(%endpoint, %path, "device answered");
                sink.report_response(
                    endpoint,
                    ticket,
                    DownlinkResponse::success_with_payload("ok", serde_json::json!({ "temp": 21.5 })),
                );
            } else {
                info!(%endpoint, %path, "device asleep, exchange timed out");
                sink.report_failure(endpoint, ticket, DownlinkError::Timeout { elapsed_ms: 50 });
            }
        });
        Ok(())
    }

    async fn cancel_pending(&self, _endpoint: &str) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let bus = EventBus::new();
    let directory = Arc::new(InMemoryDirectory::with_event_bus(bus.clone()));
    let device = Arc::new(SleepyDevice::new());

    let coordinator = DownlinkCoordinator::new(device.clone(), directory.clone(), bus.clone());
    device
        .sink
        .set(coordinator.completion_sink())
        .map_err(|_| anyhow::anyhow!("completion sink already wired"))?;
    coordinator.start().await;

    directory.register("sensor-1", BindingMode::Queued).await;

    // The device is asleep: this attempt times out and the request is held.
    let pending = coordinator.submit(
        "sensor-1",
        DownlinkRequest::new(OperationKind::Read, "/3303/0/5700"),
    )
    .await?;
    info!(ticket = %pending.ticket(), "request queued");

    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(state = ?coordinator.endpoint_state("sensor-1"), pending = coordinator.pending_count("sensor-1"), "after timeout");

    // The device reports a value: that is the wake signal the queue waits
    // for, and the held request is retried.
    device.wake_up().await;
    bus.publish(LinkqEvent::NotificationReceived {
        endpoint: "sensor-1".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
    })
    .await;

    let response = pending.wait().await.map_err(|e| anyhow::anyhow!(e))?;
    info!(message = %response.message, payload = ?response.payload, "downlink completed");

    coordinator.shutdown().await;
    Ok(())
}
