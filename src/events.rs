//! # Lifecycle Events
//!
//! Diagnostic event stream and cooperative shutdown signal.
//!
//! Events are published on a `tokio::sync::broadcast` channel. Publishing
//! never blocks: with no subscribers the event is dropped, and a slow
//! subscriber lags (loses old events) instead of stalling ingestion.

use tokio::sync::{broadcast, watch};

/// Default number of events buffered per subscriber
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle and diagnostic events emitted by the ingest core
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// An open attempt is starting (`attempt` counts from 1 per outage)
    Connecting { address: String, attempt: u32 },
    /// The link is open and streaming
    Connected { address: String },
    /// The link was lost or closed
    Disconnected { address: String, reason: String },
    /// A well-formed line failed to parse
    ParseFailure { line: String, error: String },
    /// A durable log or export write failed; ingestion continues unpersisted
    PersistenceFailure { error: String },
}

/// Cloneable, non-blocking publisher for [`PipelineEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers
    pub fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine: events are optional for the core
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

/// Sending half of the shutdown signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

/// Receiving half of the shutdown signal, checked by the worker
#[derive(Debug, Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

/// Create a connected trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

impl ShutdownTrigger {
    /// Request shutdown; idempotent
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

impl Shutdown {
    /// Whether shutdown has been requested
    ///
    /// A dropped trigger counts as a request.
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Wait until shutdown is requested
    ///
    /// Also resolves if the trigger was dropped, so a worker never outlives
    /// its owner.
    pub async fn triggered(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                return;
            }
        }
    }
}
