//! Manifest objects: the opaque structured documents the core applies and
//! prunes.
//!
//! Parsing bytes on disk or stdin into [`Object`]s is explicitly out of
//! scope; callers hand the core already-parsed objects. The
//! core's only mutation rights are attaching the inventory-owner annotation
//! and, through the [`NamespaceDefaulter`] hook, defaulting a missing
//! namespace.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::object::ObjectId;

/// The annotation the core attaches to every object it creates or patches,
/// binding the object to its owning inventory.
pub const OWNING_INVENTORY_ANNOTATION: &str = "config.k8s.io/owning-inventory";

/// A parsed manifest object: identity, desired spec, and annotations.
///
/// The `spec` field is opaque to the core -- it is handed unmodified to the
/// cluster transport. Only `annotations` is mutated by the core itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub id: ObjectId,
    pub spec: Value,
    pub annotations: BTreeMap<String, String>,
}

impl Object {
    pub fn new(id: ObjectId, spec: Value) -> Self {
        Self {
            id,
            spec,
            annotations: BTreeMap::new(),
        }
    }

    /// Read the inventory id this object is currently annotated as owned by,
    /// if any.
    pub fn owning_inventory(&self) -> Option<&str> {
        self.annotations
            .get(OWNING_INVENTORY_ANNOTATION)
            .map(|s| s.as_str())
    }

    /// Stamp the inventory-owner annotation, overwriting any previous value.
    pub fn set_owning_inventory(&mut self, inventory_id: &str) {
        self.annotations
            .insert(OWNING_INVENTORY_ANNOTATION.to_string(), inventory_id.to_string());
    }

    /// `true` if this object is already owned by `inventory_id`.
    pub fn is_owned_by(&self, inventory_id: &str) -> bool {
        self.owning_inventory() == Some(inventory_id)
    }
}

/// Hook for defaulting a missing namespace on a namespaced object.
///
/// Real namespace-resolution policy (current kubeconfig context, `-n` flag,
/// etc.) is an external concern; the core only needs somewhere to plug it
/// in before validation runs. Non-goal Non-goals.
pub trait NamespaceDefaulter: Send + Sync {
    /// Return the namespace to use for a namespaced object that did not
    /// specify one, or `None` if no default is configured (a validation
    /// error in that case).
    fn default_namespace(&self) -> Option<&str>;
}

/// A defaulter that always returns a fixed namespace. Useful in tests and
/// as the common "everything defaults to one namespace" case.
pub struct FixedNamespaceDefaulter(pub String);

impl NamespaceDefaulter for FixedNamespaceDefaulter {
    fn default_namespace(&self) -> Option<&str> {
        Some(&self.0)
    }
}

/// A defaulter with no default configured; namespaced objects missing a
/// namespace are always a validation error.
pub struct NoNamespaceDefaulter;

impl NamespaceDefaulter for NoNamespaceDefaulter {
    fn default_namespace(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> Object {
        Object::new(
            ObjectId::new("apps", "Deployment", "default", "web"),
            serde_json::json!({"replicas": 3}),
        )
    }

    #[test]
    fn fresh_object_has_no_owner() {
        let o = obj();
        assert_eq!(o.owning_inventory(), None);
        assert!(!o.is_owned_by("inv-1"));
    }

    #[test]
    fn set_owning_inventory_stamps_annotation() {
        let mut o = obj();
        o.set_owning_inventory("inv-1");
        assert_eq!(o.owning_inventory(), Some("inv-1"));
        assert!(o.is_owned_by("inv-1"));
        assert!(!o.is_owned_by("inv-2"));
    }

    #[test]
    fn fixed_namespace_defaulter() {
        let d = FixedNamespaceDefaulter("prod".to_string());
        assert_eq!(d.default_namespace(), Some("prod"));
    }

    #[test]
    fn no_namespace_defaulter() {
        let d = NoNamespaceDefaulter;
        assert_eq!(d.default_namespace(), None);
    }
}
