//! The inventory-add task. Runs exactly once at the start of
//! an apply run, before the first apply task.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{ObservedApply, TaskCompletion, TaskContext};
use crate::event::Event;
use crate::inventory::{ActuationEntry, InventoryClient, Strategy};
use crate::manifest::Object;
use crate::object::{ObjectId, ObjectSet};
use crate::transport::{ClusterTransport, DryRunStrategy, ServerSideOptions};

use super::{Action, Task};

struct InventoryAddInner {
    name: String,
    apply_ids: ObjectSet,
    prune_ids: ObjectSet,
    /// `Some` when the inventory record is namespaced and that namespace is
    /// also a manifest object in this run's apply set: the
    /// namespace must be created before the record so the record's create
    /// does not race it).
    namespace_object: Option<Object>,
    transport: Arc<dyn ClusterTransport>,
    inventory_client: Arc<dyn InventoryClient>,
    dry_run: DryRunStrategy,
    sso: ServerSideOptions,
}

/// Validates the run, eagerly creates the inventory's own namespace if
/// needed, and writes the initial inventory record.
pub struct InventoryAddTask {
    inner: Arc<InventoryAddInner>,
}

impl InventoryAddTask {
    pub fn new(
        name: impl Into<String>,
        apply_ids: ObjectSet,
        prune_ids: ObjectSet,
        namespace_object: Option<Object>,
        transport: Arc<dyn ClusterTransport>,
        inventory_client: Arc<dyn InventoryClient>,
        dry_run: DryRunStrategy,
        sso: ServerSideOptions,
    ) -> Self {
        Self {
            inner: Arc::new(InventoryAddInner {
                name: name.into(),
                apply_ids,
                prune_ids,
                namespace_object,
                transport,
                inventory_client,
                dry_run,
                sso,
            }),
        }
    }
}

async fn run_inventory_add(inner: Arc<InventoryAddInner>, ctx: TaskContext) {
    let inventory_object_id = ctx
        .inventory()
        .lock()
        .expect("inventory mutex poisoned")
        .record
        .info
        .as_object_id();

    if inner.apply_ids.contains(&inventory_object_id) {
        let reason = "apply set must not contain the inventory record itself".to_string();
        ctx.events().send(Event::Validation {
            ids: vec![inventory_object_id],
            error: reason.clone(),
        });
        ctx.complete(TaskCompletion {
            task_name: inner.name.clone(),
            error: Some(reason),
        })
        .await;
        return;
    }

    let overlap = inner.apply_ids.intersection(&inner.prune_ids);
    if !overlap.is_empty() {
        let reason = "object(s) appear in both the apply set and the prune set for this run".to_string();
        ctx.events().send(Event::Validation {
            ids: overlap.iter().cloned().collect(),
            error: reason.clone(),
        });
        ctx.complete(TaskCompletion {
            task_name: inner.name.clone(),
            error: Some(reason),
        })
        .await;
        return;
    }

    if let Some(ns) = &inner.namespace_object {
        if inner.dry_run.is_dry_run() {
            ctx.tallies()
                .lock()
                .expect("tallies mutex poisoned")
                .record_apply_outcome(ns.id.clone(), crate::inventory::Actuation::Skipped);
        } else {
            let mut stamped = ns.clone();
            let owning_inventory_id = {
                ctx.inventory()
                    .lock()
                    .expect("inventory mutex poisoned")
                    .record
                    .info
                    .inventory_id
                    .clone()
            };
            stamped.set_owning_inventory(&owning_inventory_id);
            match inner.transport.apply(&stamped, inner.dry_run, &inner.sso).await {
                Ok(result) => {
                    let mut tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
                    tallies.record_apply_outcome(ns.id.clone(), crate::inventory::Actuation::Succeeded);
                    tallies.record_observed(
                        ns.id.clone(),
                        ObservedApply {
                            uid: result.uid,
                            generation: result.generation,
                        },
                    );
                }
                Err(err) => {
                    ctx.tallies()
                        .lock()
                        .expect("tallies mutex poisoned")
                        .record_apply_outcome(ns.id.clone(), crate::inventory::Actuation::Failed);
                    tracing::warn!(namespace = %ns.id, error = %err, "failed to eagerly create inventory namespace");
                }
            }
        }
    }

    let union = inner.apply_ids.union(&inner.prune_ids);
    let record = {
        let mut mgr = ctx.inventory().lock().expect("inventory mutex poisoned");
        mgr.record.set_spec_objects(&union);
        for id in inner.apply_ids.iter() {
            mgr.record.set_status_for(id, ActuationEntry::pending(Strategy::Apply));
        }
        for id in inner.prune_ids.iter() {
            mgr.record.set_status_for(id, ActuationEntry::pending(Strategy::Delete));
        }
        mgr.record.clone()
    };

    let error = match inner.inventory_client.store(&record).await {
        Ok(()) => None,
        Err(err) => {
            tracing::error!(error = %err, "failed to persist initial inventory record");
            Some(format!("failed to persist inventory record: {err}"))
        }
    };

    ctx.complete(TaskCompletion {
        task_name: inner.name.clone(),
        error,
    })
    .await;
}

#[async_trait]
impl Task for InventoryAddTask {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn action(&self) -> Action {
        Action::Inventory
    }

    fn identifiers(&self) -> ObjectSet {
        ObjectSet::new()
    }

    async fn start(&self, ctx: TaskContext) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_inventory_add(inner, ctx));
    }

    async fn cancel(&self, _ctx: &TaskContext) {}

    async fn status_update(&self, _ctx: &TaskContext, _id: &ObjectId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Actuation, InventoryInfo, InventoryManager};
    use crate::transport::{ApplyResult, PropagationPolicy, TransportError};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct FakeTransport;

    #[async_trait]
    impl ClusterTransport for FakeTransport {
        async fn apply(
            &self,
            _object: &Object,
            _dry_run: DryRunStrategy,
            _sso: &ServerSideOptions,
        ) -> Result<ApplyResult, TransportError> {
            Ok(ApplyResult {
                operation: crate::event::ApplyOperation::Created,
                uid: Some("uid-ns".to_string()),
                generation: Some(1),
            })
        }

        async fn delete(
            &self,
            _id: &ObjectId,
            _policy: PropagationPolicy,
            _dry_run: DryRunStrategy,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn id(name: &str) -> ObjectId {
        ObjectId::new("apps", "Deployment", "default", name)
    }

    fn context() -> (TaskContext, mpsc::Receiver<TaskCompletion>, crate::event::EventSource) {
        let (sink, source) = crate::event::EventSink::channel();
        let (tx, rx) = mpsc::channel(16);
        let ctx = TaskContext::new(
            sink,
            tx,
            InventoryManager::empty(InventoryInfo::new("default", "app-inventory", "inv-1")),
        );
        (ctx, rx, source)
    }

    #[tokio::test]
    async fn writes_union_and_pending_status() {
        let (ctx, mut rx, _source) = context();
        let apply_ids: ObjectSet = [id("a")].into_iter().collect();
        let prune_ids: ObjectSet = [id("b")].into_iter().collect();
        let client = Arc::new(crate::inventory::client::InMemoryInventoryClient::new());

        let task = InventoryAddTask::new(
            "inv-add",
            apply_ids,
            prune_ids,
            None,
            Arc::new(FakeTransport),
            client.clone(),
            DryRunStrategy::None,
            ServerSideOptions::default(),
        );
        task.start(ctx.clone()).await;
        let completion = rx.recv().await.unwrap();
        assert!(completion.error.is_none());

        let mgr = ctx.inventory().lock().unwrap();
        let spec = mgr.record.spec_object_set();
        assert!(spec.contains(&id("a")));
        assert!(spec.contains(&id("b")));
        assert_eq!(mgr.record.status_for(&id("a")).unwrap().strategy, Strategy::Apply);
        assert_eq!(mgr.record.status_for(&id("b")).unwrap().strategy, Strategy::Delete);

        let stored = client.get(&InventoryInfo::new("default", "app-inventory", "inv-1")).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn overlap_between_apply_and_prune_is_rejected() {
        let (ctx, mut rx, mut source) = context();
        let apply_ids: ObjectSet = [id("a")].into_iter().collect();
        let prune_ids: ObjectSet = [id("a")].into_iter().collect();
        let client = Arc::new(crate::inventory::client::InMemoryInventoryClient::new());

        let task = InventoryAddTask::new(
            "inv-add",
            apply_ids,
            prune_ids,
            None,
            Arc::new(FakeTransport),
            client,
            DryRunStrategy::None,
            ServerSideOptions::default(),
        );
        task.start(ctx).await;

        let event = source.recv().await.unwrap();
        assert!(matches!(event, Event::Validation { .. }));
        let completion = rx.recv().await.unwrap();
        assert!(completion.error.is_some());
    }

    #[tokio::test]
    async fn rejects_apply_set_containing_the_inventory_record() {
        let (ctx, mut rx, mut source) = context();
        let inventory_object_id = ObjectId::new("", "ConfigMap", "default", "app-inventory");
        let apply_ids: ObjectSet = [inventory_object_id].into_iter().collect();
        let client = Arc::new(crate::inventory::client::InMemoryInventoryClient::new());

        let task = InventoryAddTask::new(
            "inv-add",
            apply_ids,
            ObjectSet::new(),
            None,
            Arc::new(FakeTransport),
            client,
            DryRunStrategy::None,
            ServerSideOptions::default(),
        );
        task.start(ctx).await;

        let event = source.recv().await.unwrap();
        assert!(matches!(event, Event::Validation { .. }));
        let completion = rx.recv().await.unwrap();
        assert!(completion.error.is_some());
    }

    #[tokio::test]
    async fn namespace_object_applied_eagerly() {
        let (ctx, mut rx, _source) = context();
        let ns = Object::new(ObjectId::new("", "Namespace", "", "team-a"), serde_json::json!({}));
        let apply_ids: ObjectSet = [ns.id.clone()].into_iter().collect();
        let client = Arc::new(crate::inventory::client::InMemoryInventoryClient::new());

        let task = InventoryAddTask::new(
            "inv-add",
            apply_ids,
            ObjectSet::new(),
            Some(ns.clone()),
            Arc::new(FakeTransport),
            client,
            DryRunStrategy::None,
            ServerSideOptions::default(),
        );
        task.start(ctx.clone()).await;
        rx.recv().await.unwrap();

        assert_eq!(
            ctx.tallies().lock().unwrap().apply_outcome(&ns.id),
            Some(Actuation::Succeeded)
        );
    }
}
