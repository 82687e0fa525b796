//! The inventory-finalise task. Runs exactly once at the very
//! end of a run and rewrites (or deletes) the inventory record based on the
//! tallies accumulated by every task that ran before it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{TaskCompletion, TaskContext, Tallies};
use crate::inventory::{Actuation, ActuationEntry, InventoryClient, Reconcile, Strategy};
use crate::object::{ObjectId, ObjectSet};

use super::{Action, Task};

struct InventoryFinaliseInner {
    name: String,
    destroying: bool,
    inventory_client: Arc<dyn InventoryClient>,
}

/// Rewrites `spec.objects`/`status.objects` from the run's tallies, or
/// deletes the record entirely if a destroy run leaves no residual
///.
pub struct InventoryFinaliseTask {
    inner: Arc<InventoryFinaliseInner>,
}

impl InventoryFinaliseTask {
    pub fn new(name: impl Into<String>, destroying: bool, inventory_client: Arc<dyn InventoryClient>) -> Self {
        Self {
            inner: Arc::new(InventoryFinaliseInner {
                name: name.into(),
                destroying,
                inventory_client,
            }),
        }
    }
}

fn entry_for(tallies: &Tallies, id: &ObjectId, strategy: Strategy) -> ActuationEntry {
    let actuation = match strategy {
        Strategy::Apply => tallies.apply_outcome(id).unwrap_or(Actuation::Pending),
        Strategy::Delete => tallies.delete_outcome(id).unwrap_or(Actuation::Pending),
    };
    let reconcile = tallies.reconcile_outcome(id).unwrap_or(Reconcile::Pending);
    ActuationEntry {
        strategy,
        actuation,
        reconcile,
    }
}

async fn run_finalise(inner: Arc<InventoryFinaliseInner>, ctx: TaskContext) {
    let error = if inner.destroying {
        finalise_destroy(&inner, &ctx).await
    } else {
        finalise_apply(&inner, &ctx).await
    };

    ctx.complete(TaskCompletion {
        task_name: inner.name.clone(),
        error,
    })
    .await;
}

async fn finalise_destroy(inner: &InventoryFinaliseInner, ctx: &TaskContext) -> Option<String> {
    let residual: ObjectSet = {
        let tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
        tallies
            .failed_deletes()
            .union(&tallies.skipped_deletes())
            .union(&tallies.failed_reconciles())
            .union(&tallies.skipped_reconciles())
            .union(&tallies.timeout_reconciles())
    };

    let info = ctx.inventory().lock().expect("inventory mutex poisoned").record.info.clone();

    if residual.is_empty() {
        if let Err(err) = inner.inventory_client.delete(&info).await {
            tracing::error!(error = %err, "failed to delete inventory record on destroy completion");
            return Some(format!("failed to delete inventory record: {err}"));
        }
        return None;
    }

    let record = {
        let mut mgr = ctx.inventory().lock().expect("inventory mutex poisoned");
        mgr.record.set_spec_objects(&residual);
        let tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
        for id in residual.iter() {
            mgr.record.set_status_for(id, entry_for(&tallies, id, Strategy::Delete));
        }
        mgr.record.clone()
    };

    if let Err(err) = inner.inventory_client.store(&record).await {
        tracing::error!(error = %err, "failed to persist residual inventory record");
        return Some(format!("failed to persist residual inventory record: {err}"));
    }
    None
}

async fn finalise_apply(inner: &InventoryFinaliseInner, ctx: &TaskContext) -> Option<String> {
    let (applied, prune_failures) = {
        let tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
        (tallies.applied_objects(), tallies.failed_deletes())
    };
    let next_spec = applied.union(&prune_failures);

    let record = {
        let mut mgr = ctx.inventory().lock().expect("inventory mutex poisoned");
        mgr.record.set_spec_objects(&next_spec);
        let tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
        for id in next_spec.iter() {
            let strategy = if prune_failures.contains(id) {
                Strategy::Delete
            } else {
                Strategy::Apply
            };
            mgr.record.set_status_for(id, entry_for(&tallies, id, strategy));
        }
        mgr.record.clone()
    };

    if let Err(err) = inner.inventory_client.store(&record).await {
        tracing::error!(error = %err, "failed to persist finalised inventory record");
        return Some(format!("failed to persist finalised inventory record: {err}"));
    }
    None
}

#[async_trait]
impl Task for InventoryFinaliseTask {
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
        tokio::spawn(run_finalise(inner, ctx));
    }

    async fn cancel(&self, _ctx: &TaskContext) {}

    async fn status_update(&self, _ctx: &TaskContext, _id: &ObjectId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::client::InMemoryInventoryClient;
    use crate::inventory::{InventoryInfo, InventoryManager};
    use tokio::sync::mpsc;

    fn id(name: &str) -> ObjectId {
        ObjectId::new("apps", "Deployment", "default", name)
    }

    fn context(info: InventoryInfo) -> (TaskContext, mpsc::Receiver<TaskCompletion>) {
        let (sink, _source) = crate::event::EventSink::channel();
        let (tx, rx) = mpsc::channel(16);
        let ctx = TaskContext::new(sink, tx, InventoryManager::empty(info));
        (ctx, rx)
    }

    #[tokio::test]
    async fn destroy_with_no_residual_deletes_record() {
        let info = InventoryInfo::new("default", "inv", "inv-1");
        let (ctx, mut rx) = context(info.clone());
        let client = Arc::new(InMemoryInventoryClient::new());
        client.store(&ctx.inventory().lock().unwrap().record.clone()).await.unwrap();

        ctx.tallies().lock().unwrap().record_delete_outcome(id("a"), Actuation::Succeeded);

        let task = InventoryFinaliseTask::new("inv-final", true, client.clone());
        task.start(ctx).await;
        let completion = rx.recv().await.unwrap();
        assert!(completion.error.is_none());
        assert!(client.get(&info).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn destroy_residual_keeps_record_with_failed_objects_only() {
        let info = InventoryInfo::new("default", "inv", "inv-1");
        let (ctx, mut rx) = context(info.clone());
        let client = Arc::new(InMemoryInventoryClient::new());

        ctx.tallies().lock().unwrap().record_delete_outcome(id("ok"), Actuation::Succeeded);
        ctx.tallies().lock().unwrap().record_delete_outcome(id("bad"), Actuation::Failed);

        let task = InventoryFinaliseTask::new("inv-final", true, client.clone());
        task.start(ctx).await;
        rx.recv().await.unwrap();

        let stored = client.get(&info).await.unwrap().unwrap();
        let spec = stored.spec_object_set();
        assert!(spec.contains(&id("bad")));
        assert!(!spec.contains(&id("ok")));
    }

    #[tokio::test]
    async fn apply_finalise_retains_prune_failures_for_retry() {
        let info = InventoryInfo::new("default", "inv", "inv-1");
        let (ctx, mut rx) = context(info.clone());
        let client = Arc::new(InMemoryInventoryClient::new());

        ctx.tallies().lock().unwrap().record_apply_outcome(id("a"), Actuation::Succeeded);
        ctx.tallies().lock().unwrap().record_delete_outcome(id("stale"), Actuation::Failed);

        let task = InventoryFinaliseTask::new("inv-final", false, client.clone());
        task.start(ctx).await;
        rx.recv().await.unwrap();

        let stored = client.get(&info).await.unwrap().unwrap();
        let spec = stored.spec_object_set();
        assert!(spec.contains(&id("a")));
        assert!(spec.contains(&id("stale")));
        assert_eq!(stored.status_for(&id("stale")).unwrap().strategy, Strategy::Delete);
    }
}
