//! Broadcast runtime events for UI-facing subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// Out-of-band notifications published alongside turn streams.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A chat title was generated or back-filled.
    TitleUpdated {
        /// Owning chat.
        chat_id: String,
        /// The new title.
        title: String,
    },
    /// A turn began streaming.
    TurnStarted {
        /// Owning chat.
        chat_id: String,
    },
    /// A turn finished (success, cancellation, or error).
    TurnFinished {
        /// Owning chat.
        chat_id: String,
    },
}

impl RuntimeEvent {
    /// The chat this event concerns.
    #[must_use]
    pub fn chat_id(&self) -> &str {
        match self {
            Self::TitleUpdated { chat_id, .. }
            | Self::TurnStarted { chat_id }
            | Self::TurnFinished { chat_id } => chat_id,
        }
    }
}

/// Broadcast-based event emitter.
///
/// Non-blocking: `emit` never awaits. Slow receivers lag and are dropped
/// rather than blocking the sender.
pub struct EventEmitter {
    tx: broadcast::Sender<RuntimeEvent>,
    emit_count: AtomicU64,
}

impl EventEmitter {
    /// Create a new emitter with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new emitter with a custom channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            emit_count: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers. Returns the receiver count.
    pub fn emit(&self, event: RuntimeEvent) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total number of events emitted.
    #[must_use]
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
