//! The task-queue runner: drives the queue serially while a
//! parallel status-watcher stream feeds the resource cache and the current
//! wait task.
//!
//! Modelled on `orchestrator::run_orchestrator`'s channel-select drive loop
//! (spawn/await/cancel over `tokio::select!`), adapted from a DAG-of-agents
//! scheduler to a linear task-queue scheduler with a status-multiplexing
//! branch instead of a ready-task spawner.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::{TaskCompletion, TaskContext};
use crate::event::{ActionGroupStatus, Event};
use crate::status::StatusEvent;
use crate::task::Task;
use crate::RunError;

/// Drive `queue` to completion.
///
/// Pops one task at a time, brackets its execution with
/// `ActionGroupStarted`/`ActionGroupFinished` events, and multiplexes the
/// status-watcher stream into the resource cache and the in-flight task's
/// `status_update` hook while waiting for that task's completion message.
///
/// Returns the first fatal error encountered (a watcher error, the caller's
/// cancellation, or a task-level error) -- per-object failures never
/// surface here, only through the event stream and tallies.
pub async fn run_queue(
    queue: Vec<Box<dyn Task>>,
    ctx: TaskContext,
    mut completion_rx: mpsc::Receiver<TaskCompletion>,
    status_source: Pin<Box<dyn Stream<Item = StatusEvent> + Send>>,
    cancel: CancellationToken,
    emit_status_events: bool,
) -> Result<(), RunError> {
    tokio::pin!(status_source);
    let mut watcher_done = false;
    let mut abort: Option<RunError> = None;

    for task in queue {
        if let Some(err) = abort {
            return Err(err);
        }

        let name = task.name().to_string();
        let action = task.action();

        ctx.events().send(Event::ActionGroup {
            name: name.clone(),
            action,
            status: ActionGroupStatus::Started,
        });
        tracing::info!(task = %name, ?action, "task started");

        task.start(ctx.clone()).await;

        let mut pending_abort: Option<RunError> = None;
        let task_error = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled(), if pending_abort.is_none() => {
                    tracing::info!(task = %name, "parent cancellation received, cancelling current task");
                    pending_abort = Some(RunError::Cancelled);
                    task.cancel(&ctx).await;
                }

                maybe_status = status_source.next(), if !watcher_done => {
                    match maybe_status {
                        Some(StatusEvent::Snapshot(snapshot)) => {
                            let id = snapshot.id.clone();
                            ctx.cache()
                                .lock()
                                .expect("cache mutex poisoned")
                                .record(snapshot.clone());
                            task.status_update(&ctx, &id).await;
                            if emit_status_events {
                                ctx.events().send(Event::Status(snapshot));
                            }
                        }
                        Some(StatusEvent::Error(message)) => {
                            tracing::error!(error = %message, "status watcher reported a fatal error");
                            if pending_abort.is_none() {
                                pending_abort = Some(RunError::Watcher(message));
                            }
                            task.cancel(&ctx).await;
                        }
                        None => {
                            watcher_done = true;
                        }
                    }
                }

                completion = completion_rx.recv() => {
                    let Some(completion) = completion else {
                        return Err(RunError::ChannelClosed);
                    };
                    if let Some(task_err) = completion.error {
                        break Some(RunError::Task(task_err));
                    }
                    break pending_abort.take();
                }
            }
        };

        ctx.events().send(Event::ActionGroup {
            name: name.clone(),
            action,
            status: ActionGroupStatus::Finished,
        });
        tracing::info!(task = %name, "task finished");

        if let Some(err) = task_error {
            abort = Some(err);
        }
    }

    match abort {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
