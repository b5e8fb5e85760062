//! Event bus for LinkQ event-driven wiring.
//!
//! The directory and the notification subsystem publish here; the downlink
//! queue coordinator subscribes to detect wake signals. The bus uses a
//! broadcast channel so any number of components can observe the same
//! stream.

use crate::event::{EventMetadata, LinkqEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Event bus for LinkQ.
///
/// Supports publishing events with automatic metadata generation,
/// subscribing to all events, and filtered subscriptions.
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel sender
    tx: broadcast::Sender<(LinkqEvent, EventMetadata)>,
    /// Event bus name for identification
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many events are buffered for slow
    /// subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            tx: broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0,
            name: name.into(),
        }
    }

    /// Get the name of this event bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event with default metadata.
    ///
    /// The event is sent to all subscribers. If there are no subscribers,
    /// the event is discarded. Returns `true` if there was at least one
    /// subscriber.
    pub async fn publish(&self, event: LinkqEvent) -> bool {
        self.publish_with_source(event, "system").await
    }

    /// Publish an event with a custom source.
    pub async fn publish_with_source(
        &self,
        event: LinkqEvent,
        source: impl Into<String>,
    ) -> bool {
        let metadata = EventMetadata::new(source);
        self.tx.send((event, metadata)).is_ok()
    }

    /// Subscribe to all events.
    ///
    /// Returns a receiver that will receive all published events.
    /// If the subscriber falls behind, older events may be dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Subscribe to events matching a filter.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&LinkqEvent) -> bool + Send + 'static,
    {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, filter)
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<(LinkqEvent, EventMetadata)>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(LinkqEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    // We missed some events; resume from the oldest retained
                    // one rather than ending the stream.
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(LinkqEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&LinkqEvent) -> bool + Send,
{
    rx: broadcast::Receiver<(LinkqEvent, EventMetadata)>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&LinkqEvent) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<(LinkqEvent, EventMetadata)>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next event matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<(LinkqEvent, EventMetadata)> {
        loop {
            match self.rx.recv().await {
                Ok((event, meta)) => {
                    if (self.filter)(&event) {
                        return Some((event, meta));
                    }
                    // Event didn't match filter, continue waiting
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(LinkqEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<(LinkqEvent, EventMetadata)>,
}

impl FilterBuilder {
    /// Subscribe to wake signals only (queued registrations, updates and
    /// notifications).
    pub fn wake_signals(&self) -> FilteredReceiver<fn(&LinkqEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, LinkqEvent::is_wake_signal)
    }

    /// Subscribe to registration lifecycle events only.
    pub fn registry_events(&self) -> FilteredReceiver<fn(&LinkqEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, LinkqEvent::is_registry_event)
    }

    /// Subscribe to notification events only.
    pub fn notifications(&self) -> FilteredReceiver<fn(&LinkqEvent) -> bool> {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, |event| {
            matches!(event, LinkqEvent::NotificationReceived { .. })
        })
    }

    /// Subscribe to events for a specific endpoint.
    pub fn for_endpoint(
        &self,
        endpoint: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&LinkqEvent) -> bool + Send + 'static> {
        let target = endpoint.into();
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, move |event| event.endpoint() == target)
    }

    /// Subscribe with a custom filter function.
    pub fn custom<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&LinkqEvent) -> bool + Send + 'static,
    {
        let rx = self.tx.subscribe();
        FilteredReceiver::new(rx, filter)
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
