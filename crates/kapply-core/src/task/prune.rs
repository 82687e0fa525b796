//! The prune/delete task.
//!
//! Prune (objects dropped from this run's apply set) and Delete (objects
//! removed because the whole package is being destroyed) share this single
//! engine, parameterised by [`PruneKind`] only for which event variant is
//! emitted.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{TaskCompletion, TaskContext};
use crate::event::{ApplyOperation, ApplyOutcome, Event};
use crate::inventory::Actuation;
use crate::object::{ObjectId, ObjectSet};
use crate::transport::{ClusterTransport, DryRunStrategy, PropagationPolicy};

use super::apply::FilterDecision;
use super::{Action, Task};

/// A previously-inventoried object, together with the annotation facts a
/// prune filter needs (the live object body itself is not needed for
/// pruning -- only its identity and ownership/protection annotations).
#[derive(Debug, Clone)]
pub struct PruneCandidate {
    pub id: ObjectId,
    pub owning_inventory: Option<String>,
    pub prevent_removal: bool,
}

impl PruneCandidate {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            owning_inventory: None,
            prevent_removal: false,
        }
    }
}

/// A predicate an object must pass before the prune/delete task issues a
/// delete call for it.
pub trait PruneFilter: Send + Sync {
    fn check(&self, candidate: &PruneCandidate) -> FilterDecision;
}

/// Skip objects still present in this run's apply set.
pub struct StillAppliedFilter {
    pub apply_set: ObjectSet,
}

impl PruneFilter for StillAppliedFilter {
    fn check(&self, candidate: &PruneCandidate) -> FilterDecision {
        if self.apply_set.contains(&candidate.id) {
            FilterDecision::Reject("object is still present in this run's apply set".to_string())
        } else {
            FilterDecision::Accept
        }
    }
}

/// Skip objects whose owner annotation points at a different inventory.
pub struct ForeignOwnerFilter {
    pub inventory_id: String,
}

impl PruneFilter for ForeignOwnerFilter {
    fn check(&self, candidate: &PruneCandidate) -> FilterDecision {
        match &candidate.owning_inventory {
            Some(owner) if owner != &self.inventory_id => FilterDecision::Reject(format!(
                "object is owned by inventory {owner:?}, not {:?}",
                self.inventory_id
            )),
            _ => FilterDecision::Accept,
        }
    }
}

/// Skip objects carrying a preventRemoval annotation.
pub struct PreventRemovalFilter;

impl PruneFilter for PreventRemovalFilter {
    fn check(&self, candidate: &PruneCandidate) -> FilterDecision {
        if candidate.prevent_removal {
            FilterDecision::Reject("object is protected by a preventRemoval annotation".to_string())
        } else {
            FilterDecision::Accept
        }
    }
}

/// Skip the inventory record's own namespace when it would be co-deleted
/// along with the objects inside it.
pub struct InventoryNamespaceFilter {
    pub inventory_namespace_id: Option<ObjectId>,
}

impl PruneFilter for InventoryNamespaceFilter {
    fn check(&self, candidate: &PruneCandidate) -> FilterDecision {
        if self.inventory_namespace_id.as_ref() == Some(&candidate.id) {
            FilterDecision::Reject("object is the inventory record's own namespace".to_string())
        } else {
            FilterDecision::Accept
        }
    }
}

/// Rejects every candidate it sees, with a fixed reason. Used by the planner
/// to mark objects excluded from scheduling for a reason decided before the
/// task ever ran (e.g. participation in a dependency cycle).
pub struct RejectFilter {
    pub reason: String,
}

impl PruneFilter for RejectFilter {
    fn check(&self, _candidate: &PruneCandidate) -> FilterDecision {
        FilterDecision::Reject(self.reason.clone())
    }
}

fn run_filters(filters: &[Box<dyn PruneFilter>], candidate: &PruneCandidate) -> FilterDecision {
    for filter in filters {
        match filter.check(candidate) {
            FilterDecision::Accept => continue,
            decision => return decision,
        }
    }
    FilterDecision::Accept
}

/// Whether this task represents a prune (objects dropped from the apply
/// set) or a delete (objects removed by a destroy run). Controls only which
/// event variant is emitted -- the engine is identical otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneKind {
    Prune,
    Delete,
}

struct PruneTaskInner {
    name: String,
    kind: PruneKind,
    candidates: Vec<PruneCandidate>,
    filters: Vec<Box<dyn PruneFilter>>,
    propagation: PropagationPolicy,
    dry_run: DryRunStrategy,
    transport: Arc<dyn ClusterTransport>,
}

/// Deletes previously-inventoried objects that filters accept; a 404 from
/// the transport counts as success.
pub struct PruneTask {
    inner: Arc<PruneTaskInner>,
}

impl PruneTask {
    pub fn new(
        name: impl Into<String>,
        kind: PruneKind,
        candidates: Vec<PruneCandidate>,
        filters: Vec<Box<dyn PruneFilter>>,
        propagation: PropagationPolicy,
        dry_run: DryRunStrategy,
        transport: Arc<dyn ClusterTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(PruneTaskInner {
                name: name.into(),
                kind,
                candidates,
                filters,
                propagation,
                dry_run,
                transport,
            }),
        }
    }
}

fn emit(kind: PruneKind, id: ObjectId, outcome: ApplyOutcome, error: Option<String>) -> Event {
    match kind {
        PruneKind::Prune => Event::Prune { id, outcome, error },
        PruneKind::Delete => Event::Delete { id, outcome, error },
    }
}

async fn run_prune(inner: Arc<PruneTaskInner>, ctx: TaskContext) {
    for candidate in &inner.candidates {
        let id = candidate.id.clone();

        match run_filters(&inner.filters, candidate) {
            FilterDecision::Reject(reason) | FilterDecision::RejectInvalid(reason) => {
                ctx.tallies()
                    .lock()
                    .expect("tallies mutex poisoned")
                    .record_delete_outcome(id.clone(), Actuation::Skipped);
                ctx.events()
                    .send(emit(inner.kind, id, ApplyOutcome::Skipped, Some(reason)));
                continue;
            }
            FilterDecision::Accept => {}
        }

        match inner.transport.delete(&id, inner.propagation, inner.dry_run).await {
            Ok(()) => {
                ctx.tallies()
                    .lock()
                    .expect("tallies mutex poisoned")
                    .record_delete_outcome(id.clone(), Actuation::Succeeded);
                ctx.events().send(emit(
                    inner.kind,
                    id,
                    ApplyOutcome::Successful(ApplyOperation::Deleted),
                    None,
                ));
            }
            Err(err) => {
                ctx.tallies()
                    .lock()
                    .expect("tallies mutex poisoned")
                    .record_delete_outcome(id.clone(), Actuation::Failed);
                ctx.events()
                    .send(emit(inner.kind, id, ApplyOutcome::Failed, Some(err.message)));
            }
        }
    }

    ctx.complete(TaskCompletion {
        task_name: inner.name.clone(),
        error: None,
    })
    .await;
}

#[async_trait]
impl Task for PruneTask {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn action(&self) -> Action {
        match self.inner.kind {
            PruneKind::Prune => Action::Prune,
            PruneKind::Delete => Action::Delete,
        }
    }

    fn identifiers(&self) -> ObjectSet {
        self.inner.candidates.iter().map(|c| c.id.clone()).collect()
    }

    async fn start(&self, ctx: TaskContext) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_prune(inner, ctx));
    }

    async fn cancel(&self, _ctx: &TaskContext) {
        // Deletes already issued cannot be undone; the task runs to
        // completion and reports its partial results.
    }

    async fn status_update(&self, _ctx: &TaskContext, _id: &ObjectId) {}
}
