//! The planner: compiles an inventory info, an object set,
//! and the previous run's inventory into the task queue the runner drives.
//!
//! Three entry points mirror the three public builders: [`plan_apply`],
//! [`plan_destroy`], and the `preview` flag both take to suppress wait tasks
//! while keeping every other shape identical.

pub mod graph;

use std::sync::Arc;

use crate::event::{Event, EventSink};
use crate::inventory::{InventoryClient, InventoryInfo, InventoryPolicy};
use crate::manifest::Object;
use crate::object::{ObjectId, ObjectSet};
use crate::restmapper::RestMapper;
use crate::task::apply::{ApplyFilter, OwnershipFilter, RejectFilter as ApplyRejectFilter, RejectInventoryObjectFilter};
use crate::task::prune::{
    InventoryNamespaceFilter, PruneCandidate, PruneFilter, PruneKind, RejectFilter as PruneRejectFilter,
    StillAppliedFilter,
};
use crate::task::{Action, ApplyTask, InventoryAddTask, InventoryFinaliseTask, PruneTask, SendEventTask, Task, WaitTask};
use crate::transport::{ClusterTransport, DryRunStrategy, PropagationPolicy, ServerSideOptions};
use crate::cache::WaitCondition;
use std::time::Duration;

/// Per-run knobs the planner needs. A subset of [`crate::Options`] plus the
/// `preview` flag, which the Applier/Destroyer/Preview builders set.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub dry_run: DryRunStrategy,
    pub inventory_policy: InventoryPolicy,
    pub reconcile_timeout: Duration,
    pub prune_propagation_policy: PropagationPolicy,
    pub delete_propagation_policy: PropagationPolicy,
    pub no_prune: bool,
    pub server_side_options: ServerSideOptions,
    /// Suppress all `WaitTask`s; every other task still runs with `dry_run`.
    pub preview: bool,
}

const CYCLE_VALIDATION_ERROR: &str = "objects form a dependency cycle and were excluded from scheduling";

fn cycle_reject_reason() -> String {
    "object participates in a dependency cycle".to_string()
}

/// Build the queue for an apply run.
///
/// `apply_objects` is this run's desired state; `previous_spec` is the
/// object set named by the prior inventory record's `spec.objects` (empty
/// for a brand-new inventory).
pub fn plan_apply(
    apply_objects: Vec<Object>,
    previous_spec: ObjectSet,
    info: &InventoryInfo,
    opts: &PlanOptions,
    transport: Arc<dyn ClusterTransport>,
    inventory_client: Arc<dyn InventoryClient>,
    rest_mapper: Option<Arc<dyn RestMapper>>,
    events: &EventSink,
) -> Vec<Box<dyn Task>> {
    let inventory_id = info.inventory_id.clone();
    let apply_ids: ObjectSet = apply_objects.iter().map(|o| o.id.clone()).collect();
    let prune_ids = previous_spec.difference(&apply_ids);

    let (layers, cyclic) = graph::layer_objects(&apply_objects);
    if !cyclic.is_empty() {
        events.send(Event::Validation {
            ids: cyclic.iter().cloned().collect(),
            error: CYCLE_VALIDATION_ERROR.to_string(),
        });
    }

    // Every object in the apply set participates in a dependency cycle:
    // there is nothing left to schedule, so abort before building a queue
    // rather than running inventory-add/finalise over an empty apply.
    if !apply_objects.is_empty() && cyclic.len() == apply_objects.len() {
        return Vec::new();
    }

    let namespace_object = (!info.namespace.is_empty())
        .then(|| apply_objects.iter().find(|o| o.id.is_namespace() && o.id.name == info.namespace))
        .flatten()
        .cloned();

    let apply_layers: Vec<Vec<Object>> = layers
        .iter()
        .map(|layer| apply_objects.iter().filter(|o| layer.contains(&o.id)).cloned().collect())
        .collect();
    let cyclic_objects: Vec<Object> = apply_objects.iter().filter(|o| cyclic.contains(&o.id)).cloned().collect();

    let (prune_layers, prune_cyclic) = if opts.no_prune || prune_ids.is_empty() {
        (Vec::new(), ObjectSet::new())
    } else {
        let (layers, cyclic) = graph::layer_ids(&prune_ids);
        if !cyclic.is_empty() {
            events.send(Event::Validation {
                ids: cyclic.iter().cloned().collect(),
                error: CYCLE_VALIDATION_ERROR.to_string(),
            });
        }
        // Dependents are deleted before the namespaces/CRDs they depend on
        //, the reverse of apply ordering.
        (layers.into_iter().rev().collect::<Vec<_>>(), cyclic)
    };

    let mut groups: Vec<(String, Action, Vec<ObjectId>)> = Vec::new();
    groups.push(("inventory-add".to_string(), Action::Inventory, Vec::new()));
    for (i, layer) in apply_layers.iter().enumerate() {
        let ids: Vec<ObjectId> = layer.iter().map(|o| o.id.clone()).collect();
        groups.push((format!("apply-{i}"), Action::Apply, ids.clone()));
        if !opts.preview {
            groups.push((format!("wait-apply-{i}"), Action::Wait, ids));
        }
    }
    if !cyclic_objects.is_empty() {
        groups.push((
            "apply-cyclic".to_string(),
            Action::Apply,
            cyclic_objects.iter().map(|o| o.id.clone()).collect(),
        ));
    }
    for (i, layer) in prune_layers.iter().enumerate() {
        let ids: Vec<ObjectId> = layer.iter().cloned().collect();
        groups.push((format!("prune-residual-{i}"), Action::Prune, ids.clone()));
        if !opts.preview {
            groups.push((format!("wait-prune-residual-{i}"), Action::Wait, ids));
        }
    }
    if !prune_cyclic.is_empty() {
        groups.push((
            "prune-residual-cyclic".to_string(),
            Action::Prune,
            prune_cyclic.iter().cloned().collect(),
        ));
    }
    groups.push(("inventory-finalise".to_string(), Action::Inventory, Vec::new()));

    let mut queue: Vec<Box<dyn Task>> = vec![Box::new(SendEventTask::new("init", Event::Init { groups }))];

    queue.push(Box::new(InventoryAddTask::new(
        "inventory-add",
        apply_ids.clone(),
        prune_ids.clone(),
        namespace_object,
        transport.clone(),
        inventory_client.clone(),
        opts.dry_run,
        opts.server_side_options.clone(),
    )));

    for (i, layer) in apply_layers.into_iter().enumerate() {
        let name = format!("apply-{i}");
        let ids: ObjectSet = layer.iter().map(|o| o.id.clone()).collect();
        let filters = apply_filters(info, &inventory_id, opts.inventory_policy);
        queue.push(Box::new(ApplyTask::new(
            name,
            layer,
            filters,
            opts.dry_run,
            opts.server_side_options.clone(),
            transport.clone(),
            inventory_id.clone(),
        )));
        if !opts.preview {
            queue.push(Box::new(WaitTask::new(
                format!("wait-apply-{i}"),
                ids,
                WaitCondition::AllCurrent,
                opts.reconcile_timeout,
                rest_mapper.clone(),
            )));
        }
    }

    if !cyclic_objects.is_empty() {
        let filters: Vec<Box<dyn ApplyFilter>> = vec![Box::new(ApplyRejectFilter {
            reason: cycle_reject_reason(),
        })];
        queue.push(Box::new(ApplyTask::new(
            "apply-cyclic",
            cyclic_objects,
            filters,
            opts.dry_run,
            opts.server_side_options.clone(),
            transport.clone(),
            inventory_id.clone(),
        )));
    }

    for (i, layer) in prune_layers.into_iter().enumerate() {
        let name = format!("prune-residual-{i}");
        let candidates: Vec<PruneCandidate> = layer.iter().cloned().map(PruneCandidate::new).collect();
        let filters = residual_prune_filters(info, &apply_ids);
        queue.push(Box::new(PruneTask::new(
            name,
            PruneKind::Prune,
            candidates,
            filters,
            opts.prune_propagation_policy,
            opts.dry_run,
            transport.clone(),
        )));
        if !opts.preview {
            queue.push(Box::new(WaitTask::new(
                format!("wait-prune-residual-{i}"),
                layer,
                WaitCondition::AllNotFound,
                opts.reconcile_timeout,
                rest_mapper.clone(),
            )));
        }
    }

    if !prune_cyclic.is_empty() {
        let candidates: Vec<PruneCandidate> = prune_cyclic.iter().cloned().map(PruneCandidate::new).collect();
        let filters: Vec<Box<dyn PruneFilter>> = vec![Box::new(PruneRejectFilter {
            reason: cycle_reject_reason(),
        })];
        queue.push(Box::new(PruneTask::new(
            "prune-residual-cyclic",
            PruneKind::Prune,
            candidates,
            filters,
            opts.prune_propagation_policy,
            opts.dry_run,
            transport.clone(),
        )));
    }

    queue.push(Box::new(InventoryFinaliseTask::new("inventory-finalise", false, inventory_client)));

    queue
}

/// Build the queue for a destroy run. `NoPrune` is ignored here -- destroy
/// implies prune.
pub fn plan_destroy(
    previous_spec: ObjectSet,
    info: &InventoryInfo,
    opts: &PlanOptions,
    transport: Arc<dyn ClusterTransport>,
    inventory_client: Arc<dyn InventoryClient>,
    rest_mapper: Option<Arc<dyn RestMapper>>,
    events: &EventSink,
) -> Vec<Box<dyn Task>> {
    let (layers, cyclic) = graph::layer_ids(&previous_spec);
    if !cyclic.is_empty() {
        events.send(Event::Validation {
            ids: cyclic.iter().cloned().collect(),
            error: CYCLE_VALIDATION_ERROR.to_string(),
        });
    }
    let reversed: Vec<ObjectSet> = layers.into_iter().rev().collect();

    let inventory_namespace_id =
        (!info.namespace.is_empty()).then(|| ObjectId::cluster_scoped("", "Namespace", info.namespace.clone()));

    let mut groups: Vec<(String, Action, Vec<ObjectId>)> = Vec::new();
    for (i, layer) in reversed.iter().enumerate() {
        let ids: Vec<ObjectId> = layer.iter().cloned().collect();
        groups.push((format!("delete-{i}"), Action::Delete, ids.clone()));
        if !opts.preview {
            groups.push((format!("wait-delete-{i}"), Action::Wait, ids));
        }
    }
    if !cyclic.is_empty() {
        groups.push(("delete-cyclic".to_string(), Action::Delete, cyclic.iter().cloned().collect()));
    }
    groups.push(("inventory-finalise".to_string(), Action::Inventory, Vec::new()));

    let mut queue: Vec<Box<dyn Task>> = vec![Box::new(SendEventTask::new("init", Event::Init { groups }))];

    for (i, layer) in reversed.into_iter().enumerate() {
        let name = format!("delete-{i}");
        let candidates: Vec<PruneCandidate> = layer.iter().cloned().map(PruneCandidate::new).collect();
        let filters: Vec<Box<dyn PruneFilter>> = vec![Box::new(InventoryNamespaceFilter {
            inventory_namespace_id: inventory_namespace_id.clone(),
        })];
        queue.push(Box::new(PruneTask::new(
            name,
            PruneKind::Delete,
            candidates,
            filters,
            opts.delete_propagation_policy,
            opts.dry_run,
            transport.clone(),
        )));
        if !opts.preview {
            queue.push(Box::new(WaitTask::new(
                format!("wait-delete-{i}"),
                layer,
                WaitCondition::AllNotFound,
                opts.reconcile_timeout,
                rest_mapper.clone(),
            )));
        }
    }

    if !cyclic.is_empty() {
        let candidates: Vec<PruneCandidate> = cyclic.iter().cloned().map(PruneCandidate::new).collect();
        let filters: Vec<Box<dyn PruneFilter>> = vec![Box::new(PruneRejectFilter {
            reason: cycle_reject_reason(),
        })];
        queue.push(Box::new(PruneTask::new(
            "delete-cyclic",
            PruneKind::Delete,
            candidates,
            filters,
            opts.delete_propagation_policy,
            opts.dry_run,
            transport.clone(),
        )));
    }

    queue.push(Box::new(InventoryFinaliseTask::new("inventory-finalise", true, inventory_client)));

    queue
}

fn apply_filters(info: &InventoryInfo, inventory_id: &str, policy: InventoryPolicy) -> Vec<Box<dyn ApplyFilter>> {
    vec![
        Box::new(RejectInventoryObjectFilter {
            inventory_object_id: info.as_object_id(),
        }),
        Box::new(OwnershipFilter {
            inventory_id: inventory_id.to_string(),
            policy,
        }),
    ]
}

/// Filters for the apply run's residual-prune step. `ForeignOwnerFilter` and
/// `PreventRemovalFilter` are deliberately not included here: both need the
/// live object's annotations, and the planner only has the bare `ObjectId`
/// persisted in `spec.objects` -- a caller wiring a transport that also
/// tracks that data can still compose those filters manually with
/// `PruneTask::new`.
fn residual_prune_filters(info: &InventoryInfo, apply_ids: &ObjectSet) -> Vec<Box<dyn PruneFilter>> {
    let inventory_namespace_id =
        (!info.namespace.is_empty()).then(|| ObjectId::cluster_scoped("", "Namespace", info.namespace.clone()));
    vec![
        Box::new(StillAppliedFilter {
            apply_set: apply_ids.clone(),
        }),
        Box::new(InventoryNamespaceFilter { inventory_namespace_id }),
    ]
}
