//! Progress reporting for download tasks
//!
//! Progress events are the only way external callers learn task state. Each
//! task's events are strictly ordered; events for different tasks interleave
//! freely and never block each other.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{TaskId, TaskStatus};

/// One progress event on the engine's broadcast channel
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Raw progress reported by a transport while it runs
///
/// A transport reports a percentage when it can compute one, a message when
/// it cannot (unknown content length, helper status text), or both.
#[derive(Debug, Clone, Default)]
pub struct TransportEvent {
    pub percent: Option<u8>,
    pub message: Option<String>,
}

impl TransportEvent {
    pub fn percent(percent: u8) -> Self {
        Self {
            percent: Some(percent),
            message: None,
        }
    }

    pub fn message<S: Into<String>>(message: S) -> Self {
        Self {
            percent: None,
            message: Some(message.into()),
        }
    }
}

/// Callback handed to transports and the extractor
pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Broadcast fan-out of progress events to any number of subscribers
///
/// Slow subscribers lag and drop old events rather than blocking emitters;
/// the registry snapshot exists for reconciliation after observer gaps.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Emit an event; a send with no live subscribers is not an error
    pub fn emit(&self, update: ProgressUpdate) {
        let _ = self.tx.send(update);
    }
}
