//! When the inventory record lives in a namespace that is itself part of
//! the apply set, that namespace is created before the inventory record,
//! and is never pruned as a side effect of dropping it from the apply set.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kapply_core::event::Event;
use kapply_core::inventory::client::InMemoryInventoryClient;
use kapply_core::inventory::InventoryInfo;
use kapply_core::{Applier, Options};

use kapply_test_utils::{deployment, namespace, FakeStatusWatcher, FakeTransport};

async fn drain(mut source: kapply_core::event::EventSource) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = source.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn namespace_holding_the_inventory_record_is_scheduled_before_it() {
    let transport = Arc::new(FakeTransport::new());
    let inventory = Arc::new(InMemoryInventoryClient::new());
    let watcher = Arc::new(FakeStatusWatcher::new());

    let ns = namespace("team-a");
    let web = deployment("team-a", "web", 1);
    watcher.push_current(ns.id.clone());
    watcher.push_current(web.id.clone());

    let applier = Applier::new(transport, inventory, watcher);
    // The inventory record's own namespace is `team-a`, the same namespace
    // object included in this run's apply set.
    let info = InventoryInfo::new("team-a", "app-inventory", "inv-1");
    let (sink, source) = kapply_core::event::EventSink::channel();

    let (result, events) = tokio::join!(
        applier.apply(CancellationToken::new(), info, vec![ns.clone(), web.clone()], Options::default(), sink),
        drain(source)
    );
    result.expect("apply should succeed");

    let init = events
        .iter()
        .find_map(|e| match e {
            Event::Init { groups } => Some(groups.clone()),
            _ => None,
        })
        .expect("an Init event should have been published");

    let namespace_group = init
        .iter()
        .position(|(_, _, ids)| ids.contains(&ns.id))
        .expect("namespace object should appear in some action group");
    let inventory_add_group = init
        .iter()
        .position(|(name, _, _)| name == "inventory-add")
        .expect("an inventory-add group should be scheduled");

    assert!(
        namespace_group < inventory_add_group,
        "the namespace holding the inventory record must be applied before inventory-add"
    );
}
