//! The per-run task context: the shared hub tasks publish outcomes through
//! and later tasks (inventory-finalise, wait) read back from.
//!
//! Tasks hold no back-pointers to each other and the runner holds no
//! pointer into a task's internals; `TaskContext` is the sole shared state,
//! matching the "avoid cyclic references" design note.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::cache::ResourceCache;
use crate::event::EventSink;
use crate::inventory::{Actuation, InventoryManager, Reconcile};
use crate::object::{ObjectId, ObjectSet};

/// Message a task posts exactly once, at the end of its execution, on the
/// shared task-completion channel: `start` must eventually deliver exactly
/// one completion message.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub task_name: String,
    /// `Some` only for a fatal, run-ending error (watcher failure or
    /// similar). Per-object failures never appear here -- they are
    /// reported through the event stream and the tallies below
    ///.
    pub error: Option<String>,
}

/// Observed identity fields recorded after a successful apply.
#[derive(Debug, Clone, Default)]
pub struct ObservedApply {
    pub uid: Option<String>,
    pub generation: Option<i64>,
}

/// Per-object actuation/reconcile tallies accumulated over a run.
///
/// All tallies are monotonic within a phase: once an object is given a
/// terminal outcome for the current phase, later writes for that same
/// phase are expected to be idempotent overwrites rather than a change of
/// terminal state. The type itself does not forbid a caller
/// from violating this -- tasks are responsible for only writing once a
/// terminal decision has actually been made.
#[derive(Debug, Default)]
pub struct Tallies {
    apply_outcomes: HashMap<ObjectId, Actuation>,
    delete_outcomes: HashMap<ObjectId, Actuation>,
    observed: HashMap<ObjectId, ObservedApply>,
    reconcile_outcomes: HashMap<ObjectId, Reconcile>,
}

impl Tallies {
    pub fn record_apply_outcome(&mut self, id: ObjectId, outcome: Actuation) {
        self.apply_outcomes.insert(id, outcome);
    }

    pub fn record_delete_outcome(&mut self, id: ObjectId, outcome: Actuation) {
        self.delete_outcomes.insert(id, outcome);
    }

    pub fn record_observed(&mut self, id: ObjectId, observed: ObservedApply) {
        self.observed.insert(id, observed);
    }

    pub fn record_reconcile_outcome(&mut self, id: ObjectId, outcome: Reconcile) {
        self.reconcile_outcomes.insert(id, outcome);
    }

    pub fn apply_outcome(&self, id: &ObjectId) -> Option<Actuation> {
        self.apply_outcomes.get(id).copied()
    }

    pub fn delete_outcome(&self, id: &ObjectId) -> Option<Actuation> {
        self.delete_outcomes.get(id).copied()
    }

    pub fn reconcile_outcome(&self, id: &ObjectId) -> Option<Reconcile> {
        self.reconcile_outcomes.get(id).copied()
    }

    pub fn observed(&self, id: &ObjectId) -> Option<&ObservedApply> {
        self.observed.get(id)
    }

    fn ids_with_apply(&self, outcome: Actuation) -> ObjectSet {
        self.apply_outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn ids_with_delete(&self, outcome: Actuation) -> ObjectSet {
        self.delete_outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn ids_with_reconcile(&self, outcome: Reconcile) -> ObjectSet {
        self.reconcile_outcomes
            .iter()
            .filter(|(_, o)| **o == outcome)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Objects that were successfully applied (apply run outcome tracking).
    pub fn applied_objects(&self) -> ObjectSet {
        self.ids_with_apply(Actuation::Succeeded)
    }

    pub fn failed_deletes(&self) -> ObjectSet {
        self.ids_with_delete(Actuation::Failed)
    }

    pub fn skipped_deletes(&self) -> ObjectSet {
        self.ids_with_delete(Actuation::Skipped)
    }

    pub fn failed_reconciles(&self) -> ObjectSet {
        self.ids_with_reconcile(Reconcile::Failed)
    }

    pub fn skipped_reconciles(&self) -> ObjectSet {
        self.ids_with_reconcile(Reconcile::Skipped)
    }

    pub fn timeout_reconciles(&self) -> ObjectSet {
        self.ids_with_reconcile(Reconcile::Timeout)
    }
}

/// The per-run mutable state shared by every task in a queue.
#[derive(Clone)]
pub struct TaskContext {
    event_sink: EventSink,
    completion_tx: mpsc::Sender<TaskCompletion>,
    cache: Arc<Mutex<ResourceCache>>,
    inventory: Arc<Mutex<InventoryManager>>,
    tallies: Arc<Mutex<Tallies>>,
}

impl TaskContext {
    pub fn new(
        event_sink: EventSink,
        completion_tx: mpsc::Sender<TaskCompletion>,
        inventory: InventoryManager,
    ) -> Self {
        Self {
            event_sink,
            completion_tx,
            cache: Arc::new(Mutex::new(ResourceCache::new())),
            inventory: Arc::new(Mutex::new(inventory)),
            tallies: Arc::new(Mutex::new(Tallies::default())),
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.event_sink
    }

    /// Post a task's single completion message. Tasks call this exactly
    /// once, after flushing all of their events -- status events must be
    /// flushed before completing.
    pub async fn complete(&self, completion: TaskCompletion) {
        if self.completion_tx.send(completion).await.is_err() {
            tracing::warn!("task completion channel closed; runner likely gone");
        }
    }

    pub fn cache(&self) -> &Mutex<ResourceCache> {
        &self.cache
    }

    pub fn inventory(&self) -> &Mutex<InventoryManager> {
        &self.inventory
    }

    pub fn tallies(&self) -> &Mutex<Tallies> {
        &self.tallies
    }
}
