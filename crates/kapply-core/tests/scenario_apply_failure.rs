//! A transport error on one object is reported per-object and does not
//! abort the run -- the rest of the apply set still proceeds.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use kapply_core::event::{ApplyOutcome, Event};
use kapply_core::inventory::client::InMemoryInventoryClient;
use kapply_core::inventory::InventoryInfo;
use kapply_core::{Applier, Options};

use kapply_test_utils::{deployment, FakeStatusWatcher, FakeTransport, ScriptedApply};

async fn drain(mut source: kapply_core::event::EventSource) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = source.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn one_object_failing_does_not_abort_the_rest_of_the_set() {
    let transport = Arc::new(FakeTransport::new());
    let inventory = Arc::new(InMemoryInventoryClient::new());
    let watcher = Arc::new(FakeStatusWatcher::new());

    let good = deployment("default", "web", 3);
    let bad = deployment("default", "quota-buster", 100);
    transport.script_apply(bad.id.clone(), ScriptedApply::Error("quota exceeded".to_string()));
    watcher.push_current(good.id.clone());

    let applier = Applier::new(transport, inventory, watcher);
    let info = InventoryInfo::new("default", "app-inventory", "inv-1");
    let (sink, source) = kapply_core::event::EventSink::channel();

    let (result, events) = tokio::join!(
        applier.apply(CancellationToken::new(), info, vec![good.clone(), bad.clone()], Options::default(), sink),
        drain(source)
    );

    result.expect("a per-object transport error is not a fatal run error");

    let outcomes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Apply { id, outcome, error } => Some((id.clone(), *outcome, error.clone())),
            _ => None,
        })
        .collect();

    assert!(outcomes
        .iter()
        .any(|(id, outcome, _)| id == &good.id && matches!(outcome, ApplyOutcome::Successful(_))));
    assert!(outcomes
        .iter()
        .any(|(id, outcome, error)| id == &bad.id && matches!(outcome, ApplyOutcome::Failed) && error.is_some()));
}
