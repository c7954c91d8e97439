use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single mutation of the shared medium, as seen by other peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: u64,
    pub key: String,
    #[serde(default)]
    pub old_value: Option<Vec<u8>>,
    #[serde(default)]
    pub new_value: Option<Vec<u8>>,
    /// Origin tag of the peer instance that made the change
    pub origin: String,
}

impl ChangeEvent {
    pub fn event_type(&self) -> EventType {
        if self.new_value.is_some() {
            EventType::Put
        } else {
            EventType::Delete
        }
    }
}

/// In-memory event log that tracks all medium mutations with monotonic sequence numbers.
/// Subscribers receive every event; `ChangeSignal` narrows that down per peer.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<ChangeEvent>,
}

struct EventLogInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: VecDeque<ChangeEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a new event log with the given capacity for recent events.
    pub fn new(max_events: usize, broadcast_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(broadcast_capacity);
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: VecDeque::with_capacity(max_events),
                max_events,
            })),
            sender,
        }
    }

    /// Record a new event. Called by `SharedStore` on every mutation.
    pub async fn emit(
        &self,
        key: &str,
        old_value: Option<Vec<u8>>,
        new_value: Option<Vec<u8>>,
        origin: &str,
    ) -> ChangeEvent {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = ChangeEvent {
            seq: inner.seq,
            key: key.to_string(),
            old_value,
            new_value,
            origin: origin.to_string(),
        };
        // Ring buffer: remove oldest if at capacity
        if inner.events.len() >= inner.max_events {
            inner.events.pop_front();
        }
        inner.events.push_back(event.clone());
        // Broadcast to subscribers (ignore errors if no receivers)
        let _ = self.sender.send(event.clone());
        event
    }

    /// Get the current sequence number.
    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Get all buffered events since the given sequence number.
    pub async fn events_since(&self, from_seq: u64) -> Vec<ChangeEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    /// Buffered events after `from_seq`, or `None` when `from_seq` is ahead of
    /// this log. The latter means the log restarted and the caller's resume
    /// point no longer refers to it.
    pub async fn replay_since(&self, from_seq: u64) -> Option<Vec<ChangeEvent>> {
        let inner = self.inner.read().await;
        if from_seq > inner.seq {
            return None;
        }
        Some(
            inner
                .events
                .iter()
                .filter(|e| e.seq > from_seq)
                .cloned()
                .collect(),
        )
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

/// A peer's view of the change stream: events for one key, made by anyone
/// but the peer itself.
///
/// Delivery is best-effort. A receiver that falls behind skips the events it
/// lost and carries on.
pub struct ChangeSignal {
    rx: broadcast::Receiver<ChangeEvent>,
    origin: String,
    key: String,
}

impl ChangeSignal {
    pub fn new(rx: broadcast::Receiver<ChangeEvent>, origin: &str, key: &str) -> Self {
        Self {
            rx,
            origin: origin.to_string(),
            key: key.to_string(),
        }
    }

    fn wants(&self, event: &ChangeEvent) -> bool {
        event.key == self.key && event.origin != self.origin
    }

    /// Wait for the next foreign change. `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "Change signal for '{}' lagged, {} notifications dropped",
                        self.key, skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `recv`: the next pending foreign change, if any.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(
                        "Change signal for '{}' lagged, {} notifications dropped",
                        self.key, skipped
                    );
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
