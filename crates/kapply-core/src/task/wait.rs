//! The wait task -- the heart of the pipeline.
//!
//! Blocks queue advancement until every object in its set reaches the
//! target condition, or a timeout/cancel fires. All state mutation is
//! serialised by a single `std::sync::Mutex` held across the critical
//! section of `start`/`status_update` so event emission stays deterministic
//! per object; the mutex is never held
//! across an await point.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::WaitCondition;
use crate::context::{TaskCompletion, TaskContext};
use crate::event::{Event, WaitOutcome};
use crate::inventory::{Actuation, Reconcile};
use crate::object::{ObjectId, ObjectSet};
use crate::restmapper::RestMapper;

use super::{Action, Task};

/// Mutable state guarded by [`WaitInner::state`]. Invariant: `pending`,
/// `failed`, `reconciled`, and `skipped` partition the task's `ids`.
struct WaitState {
    pending: HashSet<ObjectId>,
    failed: HashSet<ObjectId>,
    reconciled: HashSet<ObjectId>,
    skipped: HashSet<ObjectId>,
}

struct WaitInner {
    name: String,
    ids: ObjectSet,
    condition: WaitCondition,
    timeout: Duration,
    rest_mapper: Option<Arc<dyn RestMapper>>,
    state: Mutex<WaitState>,
    /// Fires when `pending` empties out through normal status updates.
    done: CancellationToken,
    /// Fires when the runner explicitly cancels this task.
    cancelled: CancellationToken,
}

/// Blocks queue advancement until `ids` all meet `condition`, or until a
/// timeout or explicit cancel fires.
pub struct WaitTask {
    inner: Arc<WaitInner>,
}

impl WaitTask {
    pub fn new(
        name: impl Into<String>,
        ids: ObjectSet,
        condition: WaitCondition,
        timeout: Duration,
        rest_mapper: Option<Arc<dyn RestMapper>>,
    ) -> Self {
        Self {
            inner: Arc::new(WaitInner {
                name: name.into(),
                ids,
                condition,
                timeout,
                rest_mapper,
                state: Mutex::new(WaitState {
                    pending: HashSet::new(),
                    failed: HashSet::new(),
                    reconciled: HashSet::new(),
                    skipped: HashSet::new(),
                }),
                done: CancellationToken::new(),
                cancelled: CancellationToken::new(),
            }),
        }
    }
}

fn record_reconcile(ctx: &TaskContext, id: &ObjectId, outcome: Reconcile) {
    ctx.tallies()
        .lock()
        .expect("tallies mutex poisoned")
        .record_reconcile_outcome(id.clone(), outcome);
}

async fn timeout_future(timeout: Duration) {
    if timeout.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(timeout).await;
    }
}

/// Preceding apply/prune phase marked `id` Failed or Skipped -- it can never
/// reach the target condition and must not be waited on.
fn preceding_phase_failed_or_skipped(ctx: &TaskContext, id: &ObjectId) -> bool {
    let tallies = ctx.tallies().lock().expect("tallies mutex poisoned");
    matches!(tallies.apply_outcome(id), Some(Actuation::Failed | Actuation::Skipped))
        || matches!(tallies.delete_outcome(id), Some(Actuation::Failed | Actuation::Skipped))
}

async fn run_wait(inner: Arc<WaitInner>, ctx: TaskContext) {
    // Step 1+2: partition `ids` and emit the initial-phase events in order.
    {
        let mut state = inner.state.lock().expect("wait state mutex poisoned");
        for id in inner.ids.iter() {
            if preceding_phase_failed_or_skipped(&ctx, id) {
                state.skipped.insert(id.clone());
                record_reconcile(&ctx, id, Reconcile::Skipped);
                ctx.events().send(Event::Wait {
                    group: inner.name.clone(),
                    id: id.clone(),
                    op: WaitOutcome::Skipped,
                });
                continue;
            }
            let already_reconciled = ctx
                .cache()
                .lock()
                .expect("cache mutex poisoned")
                .already_meets(id, inner.condition);
            if already_reconciled {
                state.reconciled.insert(id.clone());
                record_reconcile(&ctx, id, Reconcile::Succeeded);
                ctx.events().send(Event::Wait {
                    group: inner.name.clone(),
                    id: id.clone(),
                    op: WaitOutcome::Reconciled,
                });
            } else {
                state.pending.insert(id.clone());
                record_reconcile(&ctx, id, Reconcile::Pending);
                ctx.events().send(Event::Wait {
                    group: inner.name.clone(),
                    id: id.clone(),
                    op: WaitOutcome::Pending,
                });
            }
        }
        // Step 3: nothing to wait on, complete immediately.
        if state.pending.is_empty() {
            inner.done.cancel();
        }
    }

    // Step 4 (arm deadline) folded into the select below.
    tokio::select! {
        _ = inner.done.cancelled() => {}
        _ = inner.cancelled.cancelled() => {
            // Explicit cancel: no timeout events, just complete.
        }
        _ = timeout_future(inner.timeout) => {
            let mut state = inner.state.lock().expect("wait state mutex poisoned");
            for id in state.pending.drain() {
                record_reconcile(&ctx, &id, Reconcile::Timeout);
                ctx.events().send(Event::Wait {
                    group: inner.name.clone(),
                    id,
                    op: WaitOutcome::Timeout,
                });
            }
        }
    }

    // Post-completion: reset the RESTMapper if a CRD was in the wait set.
    if inner.ids.iter().any(|id| id.is_crd()) {
        if let Some(rest_mapper) = &inner.rest_mapper {
            rest_mapper.reset_types();
        }
    }

    ctx.complete(TaskCompletion {
        task_name: inner.name.clone(),
        error: None,
    })
    .await;
}

fn handle_status_update(inner: &WaitInner, ctx: &TaskContext, id: &ObjectId) {
    if !inner.ids.contains(id) {
        return;
    }
    let mut state = inner.state.lock().expect("wait state mutex poisoned");
    if state.skipped.contains(id) {
        return;
    }

    let status = ctx.cache().lock().expect("cache mutex poisoned").status_of(id);
    let Some(status) = status else { return };
    let meets = inner.condition.is_met_by(status);

    if state.pending.remove(id) {
        if meets {
            state.reconciled.insert(id.clone());
            record_reconcile(ctx, id, Reconcile::Succeeded);
            ctx.events().send(Event::Wait {
                group: inner.name.clone(),
                id: id.clone(),
                op: WaitOutcome::Reconciled,
            });
        } else if status.is_failed() {
            state.failed.insert(id.clone());
            record_reconcile(ctx, id, Reconcile::Failed);
            ctx.events().send(Event::Wait {
                group: inner.name.clone(),
                id: id.clone(),
                op: WaitOutcome::Failed,
            });
        } else {
            // Still pending, no observable transition.
            state.pending.insert(id.clone());
        }
    } else if state.failed.remove(id) {
        if meets {
            state.reconciled.insert(id.clone());
            record_reconcile(ctx, id, Reconcile::Succeeded);
            ctx.events().send(Event::Wait {
                group: inner.name.clone(),
                id: id.clone(),
                op: WaitOutcome::Reconciled,
            });
        } else if !status.is_failed() {
            state.pending.insert(id.clone());
            record_reconcile(ctx, id, Reconcile::Pending);
            ctx.events().send(Event::Wait {
                group: inner.name.clone(),
                id: id.clone(),
                op: WaitOutcome::Pending,
            });
        } else {
            state.failed.insert(id.clone());
        }
    } else if state.reconciled.contains(id) && !meets {
        state.reconciled.remove(id);
        state.pending.insert(id.clone());
        record_reconcile(ctx, id, Reconcile::Pending);
        ctx.events().send(Event::Wait {
            group: inner.name.clone(),
            id: id.clone(),
            op: WaitOutcome::Pending,
        });
    }

    if state.pending.is_empty() {
        inner.done.cancel();
    }
}

#[async_trait]
impl Task for WaitTask {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn action(&self) -> Action {
        Action::Wait
    }

    fn identifiers(&self) -> ObjectSet {
        self.inner.ids.clone()
    }

    async fn start(&self, ctx: TaskContext) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_wait(inner, ctx));
    }

    async fn cancel(&self, _ctx: &TaskContext) {
        self.inner.cancelled.cancel();
    }

    async fn status_update(&self, ctx: &TaskContext, id: &ObjectId) {
        handle_status_update(&self.inner, ctx, id);
    }
}
