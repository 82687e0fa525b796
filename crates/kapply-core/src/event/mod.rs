//! The event model: the tagged union a caller observes over the lifetime of
//! a run, plus the [`EventSink`] tasks and the runner publish through.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cache::StatusSnapshot;
use crate::object::ObjectId;
use crate::task::Action;

/// Outcome of an apply attempt on a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Successful(ApplyOperation),
    Skipped,
    Failed,
}

/// What actually happened to the object during a successful apply, prune,
/// or delete. Prune/Delete events reuse this type rather than a parallel
/// one ("Prune / Delete (same shape)" as Apply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOperation {
    Created,
    Configured,
    Unchanged,
    ServerSideApplied,
    /// The object was removed from the cluster (or was already a 404).
    Deleted,
}

/// Phase marker for an [`Event::ActionGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionGroupStatus {
    Started,
    Finished,
}

/// Per-object outcome observed by a wait task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Pending,
    Reconciled,
    Skipped,
    Failed,
    Timeout,
}

/// The tagged union of everything a caller can observe.
#[derive(Debug, Clone)]
pub enum Event {
    /// Enumerates the action groups (and their identifiers) the planner
    /// compiled, emitted once before the queue starts running.
    Init { groups: Vec<(String, Action, Vec<ObjectId>)> },
    /// Brackets one task's execution.
    ActionGroup {
        name: String,
        action: Action,
        status: ActionGroupStatus,
    },
    Apply {
        id: ObjectId,
        outcome: ApplyOutcome,
        error: Option<String>,
    },
    Prune {
        id: ObjectId,
        outcome: ApplyOutcome,
        error: Option<String>,
    },
    Delete {
        id: ObjectId,
        outcome: ApplyOutcome,
        error: Option<String>,
    },
    Wait {
        group: String,
        id: ObjectId,
        op: WaitOutcome,
    },
    /// A raw cache update forwarded verbatim when `Options::emit_status_events`
    /// is set.
    Status(StatusSnapshot),
    /// A validation failure: the named objects could not be scheduled.
    Validation { ids: Vec<ObjectId>, error: String },
    /// A fatal, run-ending error.
    Error { message: String },
}

/// Write-only handle tasks and the runner publish events through.
///
/// Backed by a bounded channel. Writes must not block indefinitely: a full
/// channel does not block the publisher, so the send
/// is best-effort, a dropped event is logged, and a monotonically
/// increasing drop counter is exposed so callers can detect back-pressure.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

/// Default channel capacity for an [`EventSink`]/[`EventSource`] pair.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

impl EventSink {
    /// Create a sink/source pair with the default channel capacity.
    pub fn channel() -> (Self, EventSource) {
        Self::channel_with_capacity(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }

    pub fn channel_with_capacity(capacity: usize) -> (Self, EventSource) {
        let (tx, rx) = mpsc::channel(capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        (
            Self {
                tx,
                dropped: dropped.clone(),
            },
            EventSource { rx, dropped },
        )
    }

    /// Publish an event. Never blocks: if the consumer is too slow to keep
    /// up, the event is dropped and a warning logged.
    pub fn send(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "event channel full or closed, dropping event");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Read-only handle the caller drains the event stream through.
pub struct EventSource {
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventSource {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for callers (e.g. the planner) that run before
    /// any async runner loop is polling the sink.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_recv() {
        let (sink, mut source) = EventSink::channel();
        sink.send(Event::Error {
            message: "boom".to_string(),
        });
        let event = source.recv().await.unwrap();
        assert!(matches!(event, Event::Error { .. }));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut source) = EventSink::channel_with_capacity(1);
        sink.send(Event::Error { message: "one".into() });
        sink.send(Event::Error { message: "two".into() });
        assert_eq!(sink.dropped_count(), 1);
        let first = source.recv().await.unwrap();
        assert!(matches!(first, Event::Error { message } if message == "one"));
    }

    #[tokio::test]
    async fn send_after_source_dropped_is_noop() {
        let (sink, source) = EventSink::channel();
        drop(source);
        sink.send(Event::Error { message: "x".into() });
        assert_eq!(sink.dropped_count(), 1);
    }
}
