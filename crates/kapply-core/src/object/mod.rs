//! Object identity and object sets.
//!
//! [`ObjectId`] names a cluster object by the tuple (group, kind, namespace,
//! name). [`ObjectSet`] is an insertion-ordered set of object ids so event
//! emission and task identifiers stay deterministic across a run.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Uniquely names a cluster object.
///
/// Ordering is derived (group, kind, namespace, name) so a `Vec<ObjectId>`
/// sorts deterministically; `ObjectSet` instead preserves insertion order,
/// which is what the event stream needs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub group: String,
    pub kind: String,
    /// Empty string for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// A cluster-scoped object id (empty namespace).
    pub fn cluster_scoped(group: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(group, kind, "", name)
    }

    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// `true` if this id names a `CustomResourceDefinition`.
    pub fn is_crd(&self) -> bool {
        self.kind == "CustomResourceDefinition"
    }

    /// `true` if this id names a `Namespace`.
    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.kind == "Namespace"
    }

    /// The stable `"group/kind/namespace/name"` encoding used by the default
    /// inventory storage format.
    pub fn encode_key(&self) -> String {
        format!("{}/{}/{}/{}", self.group, self.kind, self.namespace, self.name)
    }

    /// Parse the `"group/kind/namespace/name"` encoding back into an id.
    ///
    /// The group and kind fields cannot themselves contain `/`, so this is
    /// unambiguous: exactly four fields, split on the first three slashes.
    pub fn decode_key(s: &str) -> Result<Self, ObjectIdParseError> {
        let mut parts = s.splitn(4, '/');
        let group = parts.next().ok_or_else(|| ObjectIdParseError(s.to_owned()))?;
        let kind = parts.next().ok_or_else(|| ObjectIdParseError(s.to_owned()))?;
        let namespace = parts.next().ok_or_else(|| ObjectIdParseError(s.to_owned()))?;
        let name = parts.next().ok_or_else(|| ObjectIdParseError(s.to_owned()))?;
        if parts.next().is_some() {
            return Err(ObjectIdParseError(s.to_owned()));
        }
        Ok(Self::new(group, kind, namespace, name))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_key())
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode_key(s)
    }
}

/// Error returned when an `ObjectId` key cannot be decoded.
#[derive(Debug, Clone)]
pub struct ObjectIdParseError(pub String);

impl fmt::Display for ObjectIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid object id key: {:?}", self.0)
    }
}

impl std::error::Error for ObjectIdParseError {}

/// An insertion-ordered set of [`ObjectId`]s.
///
/// Backed by a `Vec` plus a `HashSet` index so membership checks stay O(1)
/// while iteration order matches insertion order, which is what callers
/// need for deterministic event emission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectSet {
    order: Vec<ObjectId>,
    index: HashSet<ObjectId>,
}

impl ObjectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter_ordered(iter: impl IntoIterator<Item = ObjectId>) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }

    /// Insert `id` if not already present. Returns `true` if newly inserted.
    pub fn insert(&mut self, id: ObjectId) -> bool {
        if self.index.insert(id.clone()) {
            self.order.push(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObjectId> {
        self.order.iter()
    }

    /// Union, preserving `self`'s order for shared/self-only elements, then
    /// appending new elements from `other` in `other`'s order.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for id in other.iter() {
            out.insert(id.clone());
        }
        out
    }

    /// Intersection, in `self`'s order.
    pub fn intersection(&self, other: &Self) -> Self {
        Self::from_iter_ordered(
            self.order
                .iter()
                .filter(|id| other.contains(id))
                .cloned(),
        )
    }

    /// Elements of `self` not present in `other`, in `self`'s order.
    pub fn difference(&self, other: &Self) -> Self {
        Self::from_iter_ordered(
            self.order
                .iter()
                .filter(|id| !other.contains(id))
                .cloned(),
        )
    }
}

impl FromIterator<ObjectId> for ObjectSet {
    fn from_iter<T: IntoIterator<Item = ObjectId>>(iter: T) -> Self {
        Self::from_iter_ordered(iter)
    }
}

impl<'a> IntoIterator for &'a ObjectSet {
    type Item = &'a ObjectId;
    type IntoIter = std::slice::Iter<'a, ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter()
    }
}

impl IntoIterator for ObjectSet {
    type Item = ObjectId;
    type IntoIter = std::vec::IntoIter<ObjectId>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ObjectId {
        ObjectId::new("apps", "Deployment", "default", name)
    }

    #[test]
    fn encode_decode_round_trip() {
        let o = id("web");
        let key = o.encode_key();
        assert_eq!(key, "apps/Deployment/default/web");
        assert_eq!(ObjectId::decode_key(&key).unwrap(), o);
    }

    #[test]
    fn decode_rejects_malformed_key() {
        assert!(ObjectId::decode_key("too/few/parts").is_err());
    }

    #[test]
    fn cluster_scoped_has_empty_namespace() {
        let o = ObjectId::cluster_scoped("", "Namespace", "prod");
        assert!(!o.is_namespaced());
        assert!(o.is_namespace());
    }

    #[test]
    fn crd_detection() {
        let o = ObjectId::new("apiextensions.k8s.io", "CustomResourceDefinition", "", "widgets.example.com");
        assert!(o.is_crd());
    }

    #[test]
    fn set_preserves_insertion_order() {
        let mut set = ObjectSet::new();
        set.insert(id("c"));
        set.insert(id("a"));
        set.insert(id("b"));
        let names: Vec<_> = set.iter().map(|o| o.name.clone()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn set_insert_is_idempotent() {
        let mut set = ObjectSet::new();
        assert!(set.insert(id("a")));
        assert!(!set.insert(id("a")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn set_union_intersection_difference() {
        let a: ObjectSet = [id("a"), id("b")].into_iter().collect();
        let b: ObjectSet = [id("b"), id("c")].into_iter().collect();

        let union: Vec<_> = a.union(&b).iter().map(|o| o.name.clone()).collect();
        assert_eq!(union, vec!["a", "b", "c"]);

        let intersection: Vec<_> = a.intersection(&b).iter().map(|o| o.name.clone()).collect();
        assert_eq!(intersection, vec!["b"]);

        let difference: Vec<_> = a.difference(&b).iter().map(|o| o.name.clone()).collect();
        assert_eq!(difference, vec!["a"]);
    }
}
