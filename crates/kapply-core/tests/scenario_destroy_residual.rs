//! An object dropped from the apply set between two runs is pruned on the
//! second run, and a full destroy leaves nothing behind at all.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kapply_core::event::{ApplyOperation, ApplyOutcome, Event};
use kapply_core::inventory::client::InMemoryInventoryClient;
use kapply_core::inventory::{InventoryClient, InventoryInfo};
use kapply_core::{Applier, Destroyer, Options};

use kapply_test_utils::{deployment, FakeStatusWatcher, FakeTransport};

async fn drain(mut source: kapply_core::event::EventSource) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = source.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn object_dropped_from_apply_set_is_pruned_next_run() {
    let transport = Arc::new(FakeTransport::new());
    let inventory = Arc::new(InMemoryInventoryClient::new());
    let watcher = Arc::new(FakeStatusWatcher::new());

    let keep = deployment("default", "keep", 1);
    let drop = deployment("default", "drop-me", 1);
    let info = InventoryInfo::new("default", "app-inventory", "inv-1");

    watcher.push_current(keep.id.clone());
    watcher.push_current(drop.id.clone());
    let applier = Applier::new(transport.clone(), inventory.clone(), watcher.clone());
    let (sink, source) = kapply_core::event::EventSink::channel();
    let (first, _events) = tokio::join!(
        applier.apply(
            CancellationToken::new(),
            info.clone(),
            vec![keep.clone(), drop.clone()],
            Options::default(),
            sink
        ),
        drain(source)
    );
    first.expect("first apply should succeed");

    watcher.push_current(keep.id.clone());
    let (sink2, source2) = kapply_core::event::EventSink::channel();
    let (second, events2) = tokio::join!(
        applier.apply(CancellationToken::new(), info.clone(), vec![keep.clone()], Options::default(), sink2),
        drain(source2)
    );
    second.expect("second apply should succeed");

    assert!(events2
        .iter()
        .any(|e| matches!(e, Event::Prune { id, outcome: ApplyOutcome::Successful(ApplyOperation::Deleted), .. } if id == &drop.id)));

    let record = inventory.get(&info).await.unwrap().expect("inventory record should still exist");
    assert!(record.spec_object_set().contains(&keep.id));
    assert!(!record.spec_object_set().contains(&drop.id));
}

#[tokio::test]
async fn destroy_removes_the_whole_inventory_record() {
    let transport = Arc::new(FakeTransport::new());
    let inventory = Arc::new(InMemoryInventoryClient::new());
    let watcher = Arc::new(FakeStatusWatcher::new());

    let web = deployment("default", "web", 1);
    let info = InventoryInfo::new("default", "app-inventory", "inv-1");

    watcher.push_current(web.id.clone());
    let applier = Applier::new(transport.clone(), inventory.clone(), watcher.clone());
    let (sink, source) = kapply_core::event::EventSink::channel();
    let (applied, _events) = tokio::join!(
        applier.apply(CancellationToken::new(), info.clone(), vec![web.clone()], Options::default(), sink),
        drain(source)
    );
    applied.expect("apply should succeed before destroy");

    watcher.push_current(web.id.clone());
    let destroyer = Destroyer::new(transport, inventory.clone(), watcher);
    let (sink2, source2) = kapply_core::event::EventSink::channel();
    let (destroyed, events2) = tokio::join!(
        destroyer.destroy(CancellationToken::new(), info.clone(), Options::default(), sink2),
        drain(source2)
    );
    destroyed.expect("destroy should succeed");

    assert!(events2
        .iter()
        .any(|e| matches!(e, Event::Delete { id, outcome: ApplyOutcome::Successful(ApplyOperation::Deleted), .. } if id == &web.id)));
    assert!(inventory.get(&info).await.unwrap().is_none(), "destroy should remove the inventory record entirely");
}
