//! The apply task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{ObservedApply, TaskCompletion, TaskContext};
use crate::event::{ApplyOperation, ApplyOutcome, Event};
use crate::inventory::{check_ownership, Actuation, InventoryPolicy};
use crate::manifest::Object;
use crate::object::{ObjectId, ObjectSet};
use crate::transport::{ClusterTransport, DryRunStrategy, ServerSideOptions};

use super::{Action, Task};

/// Whether an object should proceed through the apply pipeline.
#[derive(Debug, Clone)]
pub enum FilterDecision {
    Accept,
    Reject(String),
    /// Rejected for a reason a caller watching for policy violations needs
    /// to see on the validation channel, not just as an ordinary skip (e.g.
    /// an inventory-ownership conflict).
    RejectInvalid(String),
}

/// A predicate an object must pass before the apply task attempts to
/// create-or-patch it.
pub trait ApplyFilter: Send + Sync {
    fn check(&self, object: &Object) -> FilterDecision;
}

/// Rejects the inventory record itself if it was accidentally included in
/// the apply set (inventory-add validates this too; this filter is the
/// apply-task-level backstop).
pub struct RejectInventoryObjectFilter {
    pub inventory_object_id: ObjectId,
}

impl ApplyFilter for RejectInventoryObjectFilter {
    fn check(&self, object: &Object) -> FilterDecision {
        if object.id == self.inventory_object_id {
            FilterDecision::Reject("object is the inventory record itself".to_string())
        } else {
            FilterDecision::Accept
        }
    }
}

/// Rejects every object it sees, with a fixed reason. Used by the planner to
/// mark objects that were excluded from scheduling for a reason decided
/// before the task ever ran (e.g. participation in a dependency cycle).
pub struct RejectFilter {
    pub reason: String,
}

impl ApplyFilter for RejectFilter {
    fn check(&self, _object: &Object) -> FilterDecision {
        FilterDecision::Reject(self.reason.clone())
    }
}

/// Rejects objects owned by a different inventory, unless the configured
/// policy permits adoption.
pub struct OwnershipFilter {
    pub inventory_id: String,
    pub policy: InventoryPolicy,
}

impl ApplyFilter for OwnershipFilter {
    fn check(&self, object: &Object) -> FilterDecision {
        match check_ownership(object.owning_inventory(), &self.inventory_id, self.policy) {
            Ok(()) => FilterDecision::Accept,
            Err(err) => FilterDecision::RejectInvalid(err.to_string()),
        }
    }
}

/// Run every filter in order; the first rejection (of either kind) wins.
fn run_filters(filters: &[Box<dyn ApplyFilter>], object: &Object) -> FilterDecision {
    for filter in filters {
        match filter.check(object) {
            FilterDecision::Accept => continue,
            decision => return decision,
        }
    }
    FilterDecision::Accept
}

struct ApplyTaskInner {
    name: String,
    objects: Vec<Object>,
    filters: Vec<Box<dyn ApplyFilter>>,
    dry_run: DryRunStrategy,
    sso: ServerSideOptions,
    transport: Arc<dyn ClusterTransport>,
    inventory_id: String,
}

/// Applies a set of manifest objects, running each through the filter
/// pipeline, stamping the inventory-owner annotation, and issuing a
/// create-or-patch through the cluster transport.
pub struct ApplyTask {
    inner: Arc<ApplyTaskInner>,
}

impl ApplyTask {
    pub fn new(
        name: impl Into<String>,
        objects: Vec<Object>,
        filters: Vec<Box<dyn ApplyFilter>>,
        dry_run: DryRunStrategy,
        sso: ServerSideOptions,
        transport: Arc<dyn ClusterTransport>,
        inventory_id: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ApplyTaskInner {
                name: name.into(),
                objects,
                filters,
                dry_run,
                sso,
                transport,
                inventory_id: inventory_id.into(),
            }),
        }
    }
}

async fn run_apply(inner: Arc<ApplyTaskInner>, ctx: TaskContext) {
    for object in &inner.objects {
        let id = object.id.clone();

        match run_filters(&inner.filters, object) {
            FilterDecision::Reject(reason) => {
                ctx.tallies()
                    .lock()
                    .expect("tallies mutex poisoned")
                    .record_apply_outcome(id.clone(), Actuation::Skipped);
                ctx.events().send(Event::Apply {
                    id,
                    outcome: ApplyOutcome::Skipped,
                    error: Some(reason),
                });
                continue;
            }
            FilterDecision::RejectInvalid(reason) => {
                ctx.tallies()
                    .lock()
                    .expect("tallies mutex poisoned")
                    .record_apply_outcome(id.clone(), Actuation::Skipped);
                ctx.events().send(Event::Apply {
                    id: id.clone(),
                    outcome: ApplyOutcome::Skipped,
                    error: Some(reason.clone()),
                });
                ctx.events().send(Event::Validation { ids: vec![id], error: reason });
                continue;
            }
            FilterDecision::Accept => {}
        }

        // Edge case (a): a CR of a CRD applied earlier in this dry run
        // does not exist in the transport's type registry yet.
        if inner.dry_run.is_dry_run() && inner.transport.type_unknown(&id).await {
            ctx.tallies()
                .lock()
                .expect("tallies mutex poisoned")
                .record_apply_outcome(id.clone(), Actuation::Succeeded);
            ctx.events().send(Event::Apply {
                id,
                outcome: ApplyOutcome::Successful(ApplyOperation::Created),
                error: None,
            });
            continue;
        }

        let mut stamped = object.clone();
        stamped.set_owning_inventory(&inner.inventory_id);

        match inner.transport.apply(&stamped, inner.dry_run, &inner.sso).await {
            Ok(result) => {
                {
                    let mut tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
                    tallies.record_apply_outcome(id.clone(), Actuation::Succeeded);
                    tallies.record_observed(
                        id.clone(),
                        ObservedApply {
                            uid: result.uid,
                            generation: result.generation,
                        },
                    );
                }
                ctx.events().send(Event::Apply {
                    id,
                    outcome: ApplyOutcome::Successful(result.operation),
                    error: None,
                });
            }
            Err(err) => {
                ctx.tallies()
                    .lock()
                    .expect("tallies mutex poisoned")
                    .record_apply_outcome(id.clone(), Actuation::Failed);
                ctx.events().send(Event::Apply {
                    id,
                    outcome: ApplyOutcome::Failed,
                    error: Some(err.message),
                });
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
impl Task for ApplyTask {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn action(&self) -> Action {
        Action::Apply
    }

    fn identifiers(&self) -> ObjectSet {
        self.inner.objects.iter().map(|o| o.id.clone()).collect()
    }

    async fn start(&self, ctx: TaskContext) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_apply(inner, ctx));
    }

    async fn cancel(&self, _ctx: &TaskContext) {
        // Apply calls that have already been issued cannot be undone; the
        // task still runs to completion and reports its partial results
        //.
    }

    async fn status_update(&self, _ctx: &TaskContext, _id: &ObjectId) {}
}
