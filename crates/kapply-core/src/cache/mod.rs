//! Resource cache: the keyed map from object identity to latest observed
//! status, fed by the external status watcher and read by wait tasks.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::object::ObjectId;

/// Observed status of a cluster object, as reported by the status watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Unknown,
    InProgress,
    Current,
    Failed,
    NotFound,
    Terminating,
}

impl ObjectStatus {
    /// `true` if this status satisfies the `AllCurrent` wait condition.
    pub fn is_current(&self) -> bool {
        matches!(self, ObjectStatus::Current)
    }

    /// `true` if this status satisfies the `AllNotFound` wait condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStatus::NotFound)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ObjectStatus::Failed)
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "Unknown",
            Self::InProgress => "InProgress",
            Self::Current => "Current",
            Self::Failed => "Failed",
            Self::NotFound => "NotFound",
            Self::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

/// A snapshot the status watcher delivers for one object.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub id: ObjectId,
    pub status: ObjectStatus,
    pub generation: Option<i64>,
    /// The raw observed object, if the watcher captured one (opaque to the
    /// core).
    pub resource: Option<Value>,
}

/// A single entry in the [`ResourceCache`].
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: ObjectStatus,
    pub generation: Option<i64>,
    pub resource: Option<Value>,
}

/// The condition a [`crate::task::wait::WaitTask`] is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    AllCurrent,
    AllNotFound,
}

impl WaitCondition {
    pub fn is_met_by(&self, status: ObjectStatus) -> bool {
        match self {
            WaitCondition::AllCurrent => status.is_current(),
            WaitCondition::AllNotFound => status.is_not_found(),
        }
    }
}

/// Keyed map from [`ObjectId`] to latest observed status.
///
/// Created empty at the start of a run, updated by status-watcher
/// callbacks relayed through the runner, read by wait tasks and the
/// inventory-finalise task, and cleared at end of run.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<ObjectId, CacheEntry>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status snapshot, creating the entry if this is the first
    /// snapshot seen for `snapshot.id`.
    pub fn record(&mut self, snapshot: StatusSnapshot) {
        self.entries.insert(
            snapshot.id,
            CacheEntry {
                status: snapshot.status,
                generation: snapshot.generation,
                resource: snapshot.resource,
            },
        );
    }

    pub fn get(&self, id: &ObjectId) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn status_of(&self, id: &ObjectId) -> Option<ObjectStatus> {
        self.entries.get(id).map(|e| e.status)
    }

    /// `true` if `id` has a cached status that already satisfies `cond`.
    pub fn already_meets(&self, id: &ObjectId, cond: WaitCondition) -> bool {
        self.status_of(id).is_some_and(|s| cond.is_met_by(s))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
