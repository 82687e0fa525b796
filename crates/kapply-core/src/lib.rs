//! Declarative apply/prune/inventory reconciliation task pipeline.
//!
//! The public surface is three builders -- [`Applier`], [`Destroyer`],
//! [`Preview`] -- each wired to a cluster transport, an inventory client,
//! and a status watcher. Each invocation method compiles a task queue via
//! [`planner`] and drives it with [`runner::run_queue`], publishing events
//! on the [`event::EventSink`] half the caller passes in and resolving to
//! the run's first fatal error, if any.

pub mod cache;
pub mod config;
pub mod context;
pub mod event;
pub mod inventory;
pub mod manifest;
pub mod object;
pub mod planner;
pub mod restmapper;
pub mod runner;
pub mod status;
pub mod task;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use config::EngineDefaults;
use context::TaskContext;
use event::{Event, EventSink, EventSource};
use inventory::{InventoryClient, InventoryInfo, InventoryManager, InventoryPolicy};
use manifest::Object;
use object::ObjectSet;
use restmapper::RestMapper;
use status::StatusWatcher;
use transport::{ClusterTransport, DryRunStrategy, PropagationPolicy, ServerSideOptions};

/// The first fatal, run-ending error the runner encountered.
/// Per-object failures never surface here -- only through the event stream
/// and the final inventory record.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("status watcher error: {0}")]
    Watcher(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("task error: {0}")]
    Task(String),
    #[error("task completion channel closed unexpectedly")]
    ChannelClosed,
}

/// Per-run options. `Default` resolves engine-wide fallbacks
/// through [`EngineDefaults::from_env`], the same `from_env`/`DEFAULT_*`
/// pattern the rest of this crate uses for process configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub dry_run: DryRunStrategy,
    pub inventory_policy: InventoryPolicy,
    pub emit_status_events: bool,
    pub poll_interval: Duration,
    pub reconcile_timeout: Duration,
    pub prune_propagation_policy: PropagationPolicy,
    pub delete_propagation_policy: PropagationPolicy,
    pub no_prune: bool,
    pub server_side_options: ServerSideOptions,
}

impl Default for Options {
    fn default() -> Self {
        let defaults = EngineDefaults::from_env();
        Self {
            dry_run: DryRunStrategy::None,
            inventory_policy: InventoryPolicy::AdoptIfNoInventory,
            emit_status_events: false,
            poll_interval: defaults.poll_interval,
            reconcile_timeout: defaults.reconcile_timeout,
            prune_propagation_policy: PropagationPolicy::Background,
            delete_propagation_policy: PropagationPolicy::Background,
            no_prune: false,
            server_side_options: ServerSideOptions::default(),
        }
    }
}

impl Options {
    fn plan_options(&self, preview: bool) -> planner::PlanOptions {
        planner::PlanOptions {
            dry_run: self.dry_run,
            inventory_policy: self.inventory_policy,
            reconcile_timeout: self.reconcile_timeout,
            prune_propagation_policy: self.prune_propagation_policy,
            delete_propagation_policy: self.delete_propagation_policy,
            no_prune: self.no_prune,
            server_side_options: self.server_side_options.clone(),
            preview,
        }
    }
}

/// Shared collaborators every builder needs: the cluster transport, the
/// inventory storage backend, the status watcher, and (optionally) a
/// type-discovery cache to reset after applying a CRD.
struct Factory {
    transport: Arc<dyn ClusterTransport>,
    inventory_client: Arc<dyn InventoryClient>,
    status_watcher: Arc<dyn StatusWatcher>,
    rest_mapper: Option<Arc<dyn RestMapper>>,
}

impl Factory {
    fn new(
        transport: Arc<dyn ClusterTransport>,
        inventory_client: Arc<dyn InventoryClient>,
        status_watcher: Arc<dyn StatusWatcher>,
    ) -> Self {
        Self {
            transport,
            inventory_client,
            status_watcher,
            rest_mapper: None,
        }
    }
}

/// Look up the previous run's spec object set for `info`, or an empty set
/// if no inventory record exists yet.
async fn previous_spec(inventory_client: &dyn InventoryClient, info: &InventoryInfo) -> ObjectSet {
    match inventory_client.get(info).await {
        Ok(Some(record)) => record.spec_object_set(),
        Ok(None) => ObjectSet::new(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to load previous inventory record, treating as empty");
            ObjectSet::new()
        }
    }
}

/// Drive `queue` to completion, relaying the status watcher's stream
/// through the same `events` sink the planner already published `Init`/
/// `Validation` events on. Mirrors `orchestrator::run_orchestrator`: a
/// plain `async fn` the caller awaits directly (or wraps in `tokio::spawn`
/// if it wants the run to proceed concurrently with draining events).
async fn drive(
    queue: Vec<Box<dyn task::Task>>,
    events: EventSink,
    info: InventoryInfo,
    status_watcher: Arc<dyn StatusWatcher>,
    watch_ids: ObjectSet,
    poll_interval: Duration,
    emit_status_events: bool,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    let (completion_tx, completion_rx) = mpsc::channel(32);
    let ctx = TaskContext::new(events, completion_tx, InventoryManager::empty(info));
    let status_source = status_watcher.watch(&watch_ids, poll_interval);

    runner::run_queue(queue, ctx, completion_rx, status_source, cancel, emit_status_events).await
}

/// Builder for apply runs.
pub struct Applier {
    factory: Factory,
}

impl Applier {
    pub fn new(
        transport: Arc<dyn ClusterTransport>,
        inventory_client: Arc<dyn InventoryClient>,
        status_watcher: Arc<dyn StatusWatcher>,
    ) -> Self {
        Self {
            factory: Factory::new(transport, inventory_client, status_watcher),
        }
    }

    /// Reset type discovery after a CRD is applied, so later tasks see the
    /// types it introduced. Omit for transports whose type registry is
    /// always current.
    pub fn with_rest_mapper(mut self, rest_mapper: Arc<dyn RestMapper>) -> Self {
        self.factory.rest_mapper = Some(rest_mapper);
        self
    }

    /// Compile and run an apply, publishing every event on `events`.
    /// `events` is the write side of an [`EventSink::channel`] pair the
    /// caller keeps the [`EventSource`] half of to drain concurrently.
    pub async fn apply(
        &self,
        cancel: CancellationToken,
        info: InventoryInfo,
        objects: Vec<Object>,
        options: Options,
        events: EventSink,
    ) -> Result<(), RunError> {
        self.run(cancel, info, objects, options, events, false).await
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        info: InventoryInfo,
        objects: Vec<Object>,
        options: Options,
        events: EventSink,
        preview: bool,
    ) -> Result<(), RunError> {
        let previous = previous_spec(self.factory.inventory_client.as_ref(), &info).await;
        let watch_ids = objects.iter().map(|o| o.id.clone()).collect::<ObjectSet>().union(&previous);
        let plan_opts = options.plan_options(preview);

        let queue = planner::plan_apply(
            objects,
            previous,
            &info,
            &plan_opts,
            self.factory.transport.clone(),
            self.factory.inventory_client.clone(),
            self.factory.rest_mapper.clone(),
            &events,
        );

        drive(
            queue,
            events,
            info,
            self.factory.status_watcher.clone(),
            watch_ids,
            options.poll_interval,
            options.emit_status_events,
            cancel,
        )
        .await
    }
}

/// Builder for destroy runs. `NoPrune` has no effect here --
/// destroy always deletes every inventoried object.
pub struct Destroyer {
    factory: Factory,
}

impl Destroyer {
    pub fn new(
        transport: Arc<dyn ClusterTransport>,
        inventory_client: Arc<dyn InventoryClient>,
        status_watcher: Arc<dyn StatusWatcher>,
    ) -> Self {
        Self {
            factory: Factory::new(transport, inventory_client, status_watcher),
        }
    }

    pub fn with_rest_mapper(mut self, rest_mapper: Arc<dyn RestMapper>) -> Self {
        self.factory.rest_mapper = Some(rest_mapper);
        self
    }

    pub async fn destroy(
        &self,
        cancel: CancellationToken,
        info: InventoryInfo,
        options: Options,
        events: EventSink,
    ) -> Result<(), RunError> {
        let previous = previous_spec(self.factory.inventory_client.as_ref(), &info).await;
        let watch_ids = previous.clone();
        let plan_opts = options.plan_options(false);

        let queue = planner::plan_destroy(
            previous,
            &info,
            &plan_opts,
            self.factory.transport.clone(),
            self.factory.inventory_client.clone(),
            self.factory.rest_mapper.clone(),
            &events,
        );

        drive(
            queue,
            events,
            info,
            self.factory.status_watcher.clone(),
            watch_ids,
            options.poll_interval,
            options.emit_status_events,
            cancel,
        )
        .await
    }
}

/// Builder for dry runs. Identical task shape to [`Applier`],
/// with every task forced to `dry_run` and wait tasks omitted.
pub struct Preview {
    applier: Applier,
}

impl Preview {
    pub fn new(
        transport: Arc<dyn ClusterTransport>,
        inventory_client: Arc<dyn InventoryClient>,
        status_watcher: Arc<dyn StatusWatcher>,
    ) -> Self {
        Self {
            applier: Applier::new(transport, inventory_client, status_watcher),
        }
    }

    pub fn with_rest_mapper(mut self, rest_mapper: Arc<dyn RestMapper>) -> Self {
        self.applier = self.applier.with_rest_mapper(rest_mapper);
        self
    }

    pub async fn preview(
        &self,
        cancel: CancellationToken,
        info: InventoryInfo,
        objects: Vec<Object>,
        options: Options,
        events: EventSink,
    ) -> Result<(), RunError> {
        let mut dry_run_options = options;
        if !dry_run_options.dry_run.is_dry_run() {
            dry_run_options.dry_run = DryRunStrategy::Client;
        }
        self.applier.run(cancel, info, objects, dry_run_options, events, true).await
    }
}
