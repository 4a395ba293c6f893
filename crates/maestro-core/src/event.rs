use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The kind of an [`Event`], rendered in dotted `subsystem.verb` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was accepted into the queue.
    TaskCreated,
    /// A task left the queue and began executing.
    TaskStarted,
    /// A task finished successfully.
    TaskCompleted,
    /// A task exhausted its retry budget and is terminally failed.
    TaskFailed,
    /// A task was cancelled by a caller.
    TaskCancelled,
    /// A resource dimension crossed the high-usage threshold.
    ResourceWarning,
    /// A resource dimension is underutilized and flagged for rebalancing.
    ResourceRebalance,
    /// An agent record was created in the registry.
    AgentCreated,
    /// An agent lifecycle start was requested.
    AgentStarted,
    /// An agent lifecycle stop was requested.
    AgentStopped,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::TaskCreated => "task.created",
            EventKind::TaskStarted => "task.started",
            EventKind::TaskCompleted => "task.completed",
            EventKind::TaskFailed => "task.failed",
            EventKind::TaskCancelled => "task.cancelled",
            EventKind::ResourceWarning => "resource.warning",
            EventKind::ResourceRebalance => "resource.rebalance",
            EventKind::AgentCreated => "agent.created",
            EventKind::AgentStarted => "agent.started",
            EventKind::AgentStopped => "agent.stopped",
        };
        write!(f, "{name}")
    }
}

/// A typed event carried on the [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// What happened.
    pub kind: EventKind,
    /// UTC timestamp of when the event was published.
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload (task id, dimension, error text, ...).
    pub payload: serde_json::Value,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Broadcast bus distributing [`Event`]s to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is dropped, matching emit-and-forget semantics. Each subscriber sees
/// events in publish order; a subscriber that falls behind the channel
/// capacity observes `RecvError::Lagged` and misses the overwritten
/// events. Delivery is therefore best-effort, not durable.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Default channel capacity per subscriber.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Creates a bus with [`Self::DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Creates a bus with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: Event) {
        tracing::debug!(kind = %event.kind, "event published");
        // A send error only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    /// Builds and publishes an event in one call.
    pub fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        self.publish(Event::new(kind, payload));
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
