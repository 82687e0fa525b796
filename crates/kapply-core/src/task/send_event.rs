//! The send-event task: publishes a single event (typically `Event::Init`)
//! and completes immediately. Used by the planner to front-load the queue
//! with the Init event without special-casing it in the runner.

use async_trait::async_trait;

use crate::context::{TaskCompletion, TaskContext};
use crate::event::Event;
use crate::object::{ObjectId, ObjectSet};

use super::{Action, Task};

pub struct SendEventTask {
    name: String,
    event: Event,
}

impl SendEventTask {
    pub fn new(name: impl Into<String>, event: Event) -> Self {
        Self {
            name: name.into(),
            event,
        }
    }
}

#[async_trait]
impl Task for SendEventTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn action(&self) -> Action {
        Action::Inventory
    }

    fn identifiers(&self) -> ObjectSet {
        ObjectSet::new()
    }

    async fn start(&self, ctx: TaskContext) {
        ctx.events().send(self.event.clone());
        ctx.complete(TaskCompletion {
            task_name: self.name.clone(),
            error: None,
        })
        .await;
    }

    async fn cancel(&self, _ctx: &TaskContext) {}

    async fn status_update(&self, _ctx: &TaskContext, _id: &ObjectId) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventoryInfo, InventoryManager};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn sends_event_then_completes() {
        let (sink, mut source) = crate::event::EventSink::channel();
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = TaskContext::new(
            sink,
            tx,
            InventoryManager::empty(InventoryInfo::new("default", "inv", "inv-1")),
        );

        let task = SendEventTask::new("init", Event::Init { groups: vec![] });
        task.start(ctx).await;

        let event = source.recv().await.unwrap();
        assert!(matches!(event, Event::Init { .. }));
        let completion = rx.recv().await.unwrap();
        assert_eq!(completion.task_name, "init");
        assert!(completion.error.is_none());
    }
}
