//! Dependency graph construction and topological layering.
//!
//! Edges come from three sources: an explicit `depends-on` annotation, a
//! CustomResourceDefinition-before-its-CustomResource rule (derived from the
//! CRD's own name, which encodes the group it defines as `<plural>.<group>`),
//! and a Namespace-before-namespaced-object rule. Layering uses Kahn's
//! algorithm; whatever is left once no zero-indegree node remains is a cycle
//! and is reported back to the caller rather than dropped silently.

use std::collections::{HashMap, HashSet};

use crate::manifest::Object;
use crate::object::{ObjectId, ObjectSet};

/// Names the objects that must be ordered before this one. Value is a
/// comma-separated list of `"group/kind/namespace/name"` encoded ids.
pub const DEPENDS_ON_ANNOTATION: &str = "config.k8s.io/depends-on";

type EdgeMap = HashMap<ObjectId, Vec<ObjectId>>;

fn crd_defined_group(id: &ObjectId) -> Option<String> {
    if !id.is_crd() {
        return None;
    }
    id.name.splitn(2, '.').nth(1).map(str::to_string)
}

/// Edges derivable from identity alone, available for both apply (full
/// manifest objects) and prune/destroy (identity only -- the manifest body
/// isn't retained in the inventory record).
fn synthetic_edges(ids: &[ObjectId]) -> EdgeMap {
    let mut edges: EdgeMap = HashMap::new();

    for crd in ids.iter().filter(|id| id.is_crd()) {
        let Some(group) = crd_defined_group(crd) else {
            continue;
        };
        for other in ids.iter().filter(|id| id.group == group) {
            edges.entry(crd.clone()).or_default().push(other.clone());
        }
    }

    for ns in ids.iter().filter(|id| id.is_namespace()) {
        for other in ids.iter().filter(|id| id.is_namespaced() && id.namespace == ns.name) {
            edges.entry(ns.clone()).or_default().push(other.clone());
        }
    }

    edges
}

fn depends_on_edges(objects: &[Object]) -> EdgeMap {
    let mut edges: EdgeMap = HashMap::new();
    let present: HashSet<&ObjectId> = objects.iter().map(|o| &o.id).collect();

    for object in objects {
        let Some(raw) = object.annotations.get(DEPENDS_ON_ANNOTATION) else {
            continue;
        };
        for key in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Ok(dep) = ObjectId::decode_key(key) else {
                continue;
            };
            if present.contains(&dep) {
                edges.entry(dep).or_default().push(object.id.clone());
            }
        }
    }

    edges
}

fn merge_edges(into: &mut EdgeMap, from: EdgeMap) {
    for (k, mut v) in from {
        into.entry(k).or_default().append(&mut v);
    }
}

/// Topologically layer `ids` using only identity-derived synthetic edges.
/// Used for prune/destroy, where only the inventoried identities are known.
pub fn layer_ids(ids: &ObjectSet) -> (Vec<ObjectSet>, ObjectSet) {
    let all: Vec<ObjectId> = ids.iter().cloned().collect();
    let edges = synthetic_edges(&all);
    kahn_layers(all, edges)
}

/// Topologically layer `objects`, combining the explicit `depends-on`
/// annotation with the identity-derived synthetic edges. Used for apply,
/// where the full manifest body (and therefore its annotations) is known.
pub fn layer_objects(objects: &[Object]) -> (Vec<ObjectSet>, ObjectSet) {
    let all: Vec<ObjectId> = objects.iter().map(|o| o.id.clone()).collect();
    let mut edges = synthetic_edges(&all);
    merge_edges(&mut edges, depends_on_edges(objects));
    kahn_layers(all, edges)
}

/// Returns `(layers, cyclic)`: `layers` in topological order (things with no
/// unsatisfied dependency come first), `cyclic` the ids that never reached
/// zero indegree.
fn kahn_layers(all: Vec<ObjectId>, edges: EdgeMap) -> (Vec<ObjectSet>, ObjectSet) {
    let mut indegree: HashMap<ObjectId, usize> = all.iter().map(|id| (id.clone(), 0)).collect();
    for dependents in edges.values() {
        for to in dependents {
            *indegree.entry(to.clone()).or_insert(0) += 1;
        }
    }

    let mut remaining: HashSet<ObjectId> = all.iter().cloned().collect();
    let mut layers = Vec::new();

    loop {
        let ready: Vec<ObjectId> = all
            .iter()
            .filter(|id| remaining.contains(*id) && indegree.get(*id).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();
        if ready.is_empty() {
            break;
        }

        let mut layer = ObjectSet::new();
        for id in &ready {
            remaining.remove(id);
            layer.insert(id.clone());
        }
        for id in &ready {
            if let Some(dependents) = edges.get(id) {
                for to in dependents {
                    if let Some(deg) = indegree.get_mut(to) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
        }
        layers.push(layer);
    }

    let cyclic: ObjectSet = all.into_iter().filter(|id| remaining.contains(id)).collect();
    (layers, cyclic)
}
