//! Progress event broadcasting
//!
//! A single broadcast channel fans pipeline events out to any number of
//! subscribers (log tail, future API surface). Emitting with no
//! subscribers is a no-op, so producers never need to care who listens.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ScanStarted {
        library_id: Uuid,
    },
    ScanProgress {
        library_id: Uuid,
        processed: usize,
        total: usize,
    },
    ScanCompleted {
        library_id: Uuid,
        added: usize,
        updated: usize,
        removed: usize,
    },
    TaskProgress {
        task_type: String,
        library_id: Uuid,
        processed: usize,
        total: usize,
    },
    TaskCompleted {
        task_id: Uuid,
        task_type: String,
    },
    TaskFailed {
        task_id: Uuid,
        task_type: String,
        error: String,
    },
    DuplicatesFlagged {
        library_id: Uuid,
        pairs: usize,
    },
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Event>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emit an event. Lagging or absent subscribers are ignored.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
