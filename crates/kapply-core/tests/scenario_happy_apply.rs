//! Happy-path apply: a fresh object set applies cleanly, reconciles, and
//! the inventory record reflects the applied set afterwards.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kapply_core::event::{ApplyOutcome, Event};
use kapply_core::inventory::client::InMemoryInventoryClient;
use kapply_core::inventory::{InventoryClient, InventoryInfo};
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
async fn apply_creates_objects_and_records_inventory() {
    let transport = Arc::new(FakeTransport::new());
    let inventory = Arc::new(InMemoryInventoryClient::new());
    let watcher = Arc::new(FakeStatusWatcher::new());

    let web = deployment("default", "web", 3);
    let ns = namespace("default");
    watcher.push_current(web.id.clone());
    watcher.push_current(ns.id.clone());

    let applier = Applier::new(transport.clone(), inventory.clone(), watcher.clone());
    let info = InventoryInfo::new("default", "app-inventory", "inv-1");
    let (sink, source) = kapply_core::event::EventSink::channel();

    let (result, events) = tokio::join!(
        applier.apply(CancellationToken::new(), info.clone(), vec![ns, web.clone()], Options::default(), sink),
        drain(source)
    );

    result.expect("apply should complete without a fatal error");

    let applied: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Apply { id, outcome, .. } => Some((id.clone(), *outcome)),
            _ => None,
        })
        .collect();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|(_, outcome)| matches!(outcome, ApplyOutcome::Successful(_))));

    let record = inventory.get(&info).await.unwrap().expect("inventory record should exist after apply");
    assert!(record.spec_object_set().contains(&web.id));
}
