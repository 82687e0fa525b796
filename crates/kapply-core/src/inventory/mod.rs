//! Inventory record, in-memory inventory manager, and the storage interface
//! a caller plugs a backing store into.

pub mod client;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::object::{ObjectId, ObjectSet};

/// Why an object was rejected from adoption into an inventory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    #[error("object has no owning-inventory annotation and policy is MustMatch")]
    NoOwner,
    #[error("object is owned by inventory {owner:?}, not {inventory_id:?}")]
    ForeignOwner { owner: String, inventory_id: String },
}

/// How the core is treating an object it owns: apply it, or delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Apply,
    Delete,
}

/// Outcome of the core's attempt to actuate (apply or delete) an object.
/// Independent of whether the object subsequently reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actuation {
    Pending,
    Succeeded,
    Failed,
    Skipped,
}

/// Outcome of an object reaching its steady-state condition, as observed by
/// the status watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reconcile {
    Pending,
    Succeeded,
    Failed,
    Skipped,
    Timeout,
}

/// Per-object status entry stored in `status.objects`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuationEntry {
    pub strategy: Strategy,
    pub actuation: Actuation,
    pub reconcile: Reconcile,
}

impl ActuationEntry {
    pub fn pending(strategy: Strategy) -> Self {
        Self {
            strategy,
            actuation: Actuation::Pending,
            reconcile: Reconcile::Pending,
        }
    }
}

/// Identity of an inventory record: its own name/namespace plus the opaque,
/// immutable id that pins ownership of the package it describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InventoryInfo {
    pub namespace: String,
    pub name: String,
    pub inventory_id: String,
}

impl InventoryInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, inventory_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            inventory_id: inventory_id.into(),
        }
    }

    /// The `ObjectId` of the inventory record itself, treated as a
    /// `ConfigMap` the way describes the default encoding.
    pub fn as_object_id(&self) -> ObjectId {
        ObjectId::new("", "ConfigMap", self.namespace.clone(), self.name.clone())
    }
}

/// The persisted document naming the objects owned by a package
///.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub info: InventoryInfo,
    pub spec_objects: ObjectSetWire,
    pub status_objects: HashMap<String, ActuationEntry>,
}

/// `ObjectSet` does not itself derive `Serialize`/`Deserialize` (it carries
/// a `HashSet` index that would round-trip order non-deterministically);
/// this wire type stores the insertion-ordered `Vec` form used for
/// persistence and converts losslessly to/from `ObjectSet`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectSetWire(pub Vec<ObjectId>);

impl From<&ObjectSet> for ObjectSetWire {
    fn from(set: &ObjectSet) -> Self {
        Self(set.iter().cloned().collect())
    }
}

impl From<&ObjectSetWire> for ObjectSet {
    fn from(wire: &ObjectSetWire) -> Self {
        ObjectSet::from_iter_ordered(wire.0.iter().cloned())
    }
}

impl InventoryRecord {
    pub fn new(info: InventoryInfo) -> Self {
        Self {
            info,
            spec_objects: ObjectSetWire::default(),
            status_objects: HashMap::new(),
        }
    }

    pub fn spec_object_set(&self) -> ObjectSet {
        ObjectSet::from(&self.spec_objects)
    }

    pub fn set_spec_objects(&mut self, set: &ObjectSet) {
        self.spec_objects = ObjectSetWire::from(set);
    }

    pub fn status_for(&self, id: &ObjectId) -> Option<ActuationEntry> {
        self.status_objects.get(&id.encode_key()).copied()
    }

    pub fn set_status_for(&mut self, id: &ObjectId, entry: ActuationEntry) {
        self.status_objects.insert(id.encode_key(), entry);
    }

    /// Rebuild `status.objects` so it is in 1-1 correspondence with
    /// `spec.objects`, keeping existing entries where present and defaulting
    /// missing ones to `default_strategy` pending.
    pub fn reconcile_status_with_spec(&mut self, default_strategy: Strategy) {
        let mut next = HashMap::with_capacity(self.spec_objects.0.len());
        for id in &self.spec_objects.0 {
            let key = id.encode_key();
            let entry = self
                .status_objects
                .get(&key)
                .copied()
                .unwrap_or_else(|| ActuationEntry::pending(default_strategy));
            next.insert(key, entry);
        }
        self.status_objects = next;
    }
}

/// Policy governing whether the core may adopt an object that is unowned,
/// or owned by a different inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryPolicy {
    /// Every object must already be owned by this inventory (or be new).
    MustMatch,
    /// An unowned object may be adopted; a foreign-owned one is still
    /// rejected.
    AdoptIfNoInventory,
    /// Any object may be adopted regardless of current ownership.
    AdoptAll,
}

/// In-memory view of the inventory record being built during a single run.
///
/// Owned exclusively by the current task: the
/// runner hands it to whichever task needs it next, but never two tasks
/// touch it concurrently.
#[derive(Debug, Clone)]
pub struct InventoryManager {
    pub record: InventoryRecord,
}

impl InventoryManager {
    pub fn new(record: InventoryRecord) -> Self {
        Self { record }
    }

    pub fn empty(info: InventoryInfo) -> Self {
        Self::new(InventoryRecord::new(info))
    }

    /// Decide whether `object` may be adopted into this inventory under
    /// `policy`. Returns `Ok(())` if adoption/ownership is fine, `Err` with
    /// the reason otherwise.
    pub fn check_ownership(&self, owning: Option<&str>, policy: InventoryPolicy) -> Result<(), InventoryError> {
        check_ownership(owning, &self.record.info.inventory_id, policy)
    }
}

/// Decide whether an object owned by `owning` (or unowned, if `None`) may
/// be adopted into the inventory named `inventory_id` under `policy`.
///
/// Free function so apply-filter construction can reuse the
/// exact same rule without borrowing a whole [`InventoryManager`].
pub fn check_ownership(owning: Option<&str>, inventory_id: &str, policy: InventoryPolicy) -> Result<(), InventoryError> {
    match owning {
        None => match policy {
            InventoryPolicy::MustMatch => Err(InventoryError::NoOwner),
            InventoryPolicy::AdoptIfNoInventory | InventoryPolicy::AdoptAll => Ok(()),
        },
        Some(owner) if owner == inventory_id => Ok(()),
        Some(owner) => match policy {
            InventoryPolicy::AdoptAll => Ok(()),
            InventoryPolicy::MustMatch | InventoryPolicy::AdoptIfNoInventory => Err(InventoryError::ForeignOwner {
                owner: owner.to_string(),
                inventory_id: inventory_id.to_string(),
            }),
        },
    }
}
