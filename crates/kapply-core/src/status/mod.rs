//! The status-watcher interface: the external, low-level resource-status
//! polling library. The core consumes the snapshots it emits; it does not
//! compute them.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::cache::StatusSnapshot;
use crate::object::ObjectSet;

/// An item on the status channel: either a snapshot for one object, or a
/// fatal watcher error that should abort the run.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    Snapshot(StatusSnapshot),
    Error(String),
}

/// Adapter interface for the status-polling library.
///
/// Object-safe; implementations drive a background polling loop and yield
/// [`StatusEvent`]s until the returned stream is dropped.
#[async_trait]
pub trait StatusWatcher: Send + Sync {
    /// Begin watching `ids` at roughly `poll_interval`, returning a stream
    /// of status events. Dropping the stream stops the watch.
    fn watch(
        &self,
        ids: &ObjectSet,
        poll_interval: Duration,
    ) -> Pin<Box<dyn Stream<Item = StatusEvent> + Send>>;
}
