//! Shared in-memory fakes for testing `kapply-core`.
//!
//! Plays the role `gator-test-utils` plays for `gator-core`, but entirely
//! in-process: there is no database in this engine, only the transport,
//! status-watcher, and inventory-client interfaces, all of which are
//! trivially backed by a map or a scripted queue.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::Stream;

use kapply_core::cache::{ObjectStatus, StatusSnapshot};
use kapply_core::event::ApplyOperation;
use kapply_core::manifest::Object;
use kapply_core::object::{ObjectId, ObjectSet};
use kapply_core::status::{StatusEvent, StatusWatcher};
use kapply_core::transport::{ApplyResult, ClusterTransport, DryRunStrategy, PropagationPolicy, ServerSideOptions, TransportError};

/// A single recorded `apply` or `delete` call, for assertions on call order
/// and arguments.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Apply { id: ObjectId, dry_run: DryRunStrategy },
    Delete { id: ObjectId, policy: PropagationPolicy, dry_run: DryRunStrategy },
}

/// The scripted outcome of a single `apply` call for one object.
#[derive(Debug, Clone)]
pub enum ScriptedApply {
    Result(ApplyResult),
    Error(String),
}

/// The scripted outcome of a single `delete` call for one object. A 404 is
/// folded into success, matching `ClusterTransport::delete`'s contract.
#[derive(Debug, Clone)]
pub enum ScriptedDelete {
    Success,
    Error(String),
}

#[derive(Default)]
struct FakeTransportState {
    apply_scripts: HashMap<ObjectId, VecDeque<ScriptedApply>>,
    delete_scripts: HashMap<ObjectId, VecDeque<ScriptedDelete>>,
    unknown_types: std::collections::HashSet<ObjectId>,
    calls: Vec<RecordedCall>,
}

/// A [`ClusterTransport`] double that records every call and plays back
/// scripted responses per [`ObjectId`]. Objects with nothing scripted
/// default to a successful `Created` apply / a successful delete.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeTransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next `apply` outcome for `id`. Calls beyond the queued
    /// scripts fall back to a successful `Created`.
    pub fn script_apply(&self, id: ObjectId, outcome: ScriptedApply) {
        self.state.lock().expect("fake transport mutex poisoned").apply_scripts.entry(id).or_default().push_back(outcome);
    }

    /// Queue the next `delete` outcome for `id`.
    pub fn script_delete(&self, id: ObjectId, outcome: ScriptedDelete) {
        self.state.lock().expect("fake transport mutex poisoned").delete_scripts.entry(id).or_default().push_back(outcome);
    }

    /// Make `type_unknown` report `true` for `id`: the case of a CR of a
    /// CRD that was itself only dry-run-applied this run.
    pub fn mark_type_unknown(&self, id: ObjectId) {
        self.state.lock().expect("fake transport mutex poisoned").unknown_types.insert(id);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().expect("fake transport mutex poisoned").calls.clone()
    }
}

#[async_trait]
impl ClusterTransport for FakeTransport {
    async fn apply(&self, object: &Object, dry_run: DryRunStrategy, _sso: &ServerSideOptions) -> Result<ApplyResult, TransportError> {
        let mut state = self.state.lock().expect("fake transport mutex poisoned");
        state.calls.push(RecordedCall::Apply {
            id: object.id.clone(),
            dry_run,
        });

        let scripted = state.apply_scripts.get_mut(&object.id).and_then(VecDeque::pop_front);
        match scripted {
            Some(ScriptedApply::Result(result)) => Ok(result),
            Some(ScriptedApply::Error(message)) => Err(TransportError::new(message)),
            None => Ok(ApplyResult {
                operation: ApplyOperation::Created,
                uid: Some(format!("uid-{}", object.id.encode_key())),
                generation: Some(1),
            }),
        }
    }

    async fn delete(&self, id: &ObjectId, policy: PropagationPolicy, dry_run: DryRunStrategy) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("fake transport mutex poisoned");
        state.calls.push(RecordedCall::Delete {
            id: id.clone(),
            policy,
            dry_run,
        });

        match state.delete_scripts.get_mut(id).and_then(VecDeque::pop_front) {
            Some(ScriptedDelete::Success) | None => Ok(()),
            Some(ScriptedDelete::Error(message)) => Err(TransportError::new(message)),
        }
    }

    async fn type_unknown(&self, id: &ObjectId) -> bool {
        self.state.lock().expect("fake transport mutex poisoned").unknown_types.contains(id)
    }
}

/// A [`StatusWatcher`] double backed by a pre-loaded queue of
/// [`StatusEvent`]s, replayed in order (ignoring the requested id set and
/// poll interval) every time `watch` is called.
#[derive(Default)]
pub struct FakeStatusWatcher {
    events: Mutex<VecDeque<StatusEvent>>,
}

impl FakeStatusWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a status event to be replayed on the next `watch` call.
    pub fn push(&self, event: StatusEvent) {
        self.events.lock().expect("fake status watcher mutex poisoned").push_back(event);
    }

    /// Queue a `Current` snapshot for `id`, the common case of "this
    /// object reconciled".
    pub fn push_current(&self, id: ObjectId) {
        self.push(StatusEvent::Snapshot(StatusSnapshot {
            id,
            status: ObjectStatus::Current,
            generation: Some(1),
            resource: None,
        }));
    }

    /// Queue a `NotFound` snapshot for `id`, the common case of "this
    /// object's delete was observed to complete".
    pub fn push_not_found(&self, id: ObjectId) {
        self.push(StatusEvent::Snapshot(StatusSnapshot {
            id,
            status: ObjectStatus::NotFound,
            generation: None,
            resource: None,
        }));
    }
}

impl StatusWatcher for FakeStatusWatcher {
    fn watch(&self, _ids: &ObjectSet, _poll_interval: std::time::Duration) -> Pin<Box<dyn Stream<Item = StatusEvent> + Send>> {
        let queued: Vec<StatusEvent> = self.events.lock().expect("fake status watcher mutex poisoned").drain(..).collect();
        Box::pin(futures::stream::iter(queued))
    }
}

/// Build a bare object id in the `apps` group, namespace `default`.
pub fn test_id(kind: &str, name: &str) -> ObjectId {
    ObjectId::new("apps", kind, "default", name)
}

/// Build a terse manifest [`Object`] with an empty `{}` spec.
pub fn test_object(group: &str, kind: &str, namespace: &str, name: &str) -> Object {
    Object::new(ObjectId::new(group, kind, namespace, name), serde_json::json!({}))
}

/// A `Deployment` manifest object with a `replicas` field, the shape most
/// scenario tests reach for first.
pub fn deployment(namespace: &str, name: &str, replicas: u32) -> Object {
    Object::new(
        ObjectId::new("apps", "Deployment", namespace, name),
        serde_json::json!({ "spec": { "replicas": replicas } }),
    )
}

/// A `ConfigMap` manifest object carrying `data`.
pub fn configmap(namespace: &str, name: &str, data: serde_json::Value) -> Object {
    Object::new(ObjectId::new("", "ConfigMap", namespace, name), serde_json::json!({ "data": data }))
}

/// A cluster-scoped `Namespace` manifest object.
pub fn namespace(name: &str) -> Object {
    Object::new(ObjectId::cluster_scoped("", "Namespace", name), serde_json::json!({}))
}
