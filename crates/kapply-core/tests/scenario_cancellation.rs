//! Cancelling the token mid-run surfaces `RunError::Cancelled` rather than
//! letting the queue run to completion.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kapply_core::inventory::client::InMemoryInventoryClient;
use kapply_core::inventory::InventoryInfo;
use kapply_core::{Applier, Options, RunError};

use kapply_test_utils::{deployment, FakeStatusWatcher, FakeTransport};

async fn drain_ignoring(mut source: kapply_core::event::EventSource) {
    while source.recv().await.is_some() {}
}

#[tokio::test]
async fn cancelling_before_the_stuck_wait_reconciles_surfaces_cancelled() {
    let transport = Arc::new(FakeTransport::new());
    let inventory = Arc::new(InMemoryInventoryClient::new());
    // No status events are ever pushed, so the wait task that follows the
    // apply task never completes on its own.
    let watcher = Arc::new(FakeStatusWatcher::new());

    let applier = Applier::new(transport, inventory, watcher);
    let info = InventoryInfo::new("default", "app-inventory", "inv-1");
    let web = deployment("default", "web", 1);
    let (sink, source) = kapply_core::event::EventSink::channel();

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let mut options = Options::default();
    options.reconcile_timeout = Duration::from_secs(30);

    let (result, _) = tokio::join!(applier.apply(cancel, info, vec![web], options, sink), drain_ignoring(source));

    assert!(matches!(result, Err(RunError::Cancelled)));
}
