//! The `Task` trait and its concrete implementations: apply, prune/delete,
//! inventory-add, inventory-finalise, wait, send-event.

pub mod apply;
pub mod inventory_add;
pub mod inventory_finalise;
pub mod prune;
pub mod send_event;
pub mod wait;

use async_trait::async_trait;

use crate::context::TaskContext;
use crate::object::{ObjectId, ObjectSet};

pub use apply::ApplyTask;
pub use inventory_add::InventoryAddTask;
pub use inventory_finalise::InventoryFinaliseTask;
pub use prune::{PruneKind, PruneTask};
pub use send_event::SendEventTask;
pub use wait::WaitTask;

/// The kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Apply,
    Prune,
    Delete,
    Wait,
    Inventory,
}

/// The task interface every queue entry implements.
///
/// Object-safe: every method returns a concrete type, so `Box<dyn Task>`
/// can be queued by the runner. Modeled directly on the object-safe
/// adapter trait pattern this ecosystem uses for pluggable backends.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identifier used in events (e.g. action-group name).
    fn name(&self) -> &str;

    fn action(&self) -> Action;

    /// The object set this task touches. May be empty (e.g. send-event).
    fn identifiers(&self) -> ObjectSet;

    /// Begin execution. Must not block the caller -- implementations that
    /// do real work spawn it and return once the spawn has been issued,
    /// eventually posting exactly one completion message on
    /// `ctx.complete(..)`.
    async fn start(&self, ctx: TaskContext);

    /// Request early termination. Tasks that cannot be interrupted may
    /// treat this as a no-op, but must still eventually complete.
    async fn cancel(&self, ctx: &TaskContext);

    /// Notify the task that `id` has a new entry in the resource cache.
    /// Only wait tasks act on this; all other tasks ignore it.
    async fn status_update(&self, ctx: &TaskContext, id: &ObjectId);
}

// Compile-time assertion that `Task` is object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Task) {}
};
