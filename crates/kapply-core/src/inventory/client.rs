//! The inventory storage interface.
//!
//! Opaque to the core: any backing format is acceptable as
//! long as round-tripping preserves `inventory-id`, `spec.objects`, and
//! `status.objects`. [`InMemoryInventoryClient`] is the reference
//! implementation, usable both as a real (process-lifetime) default and as
//! a test double.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{InventoryInfo, InventoryRecord};

/// Errors an [`InventoryClient`] implementation can report.
#[derive(Debug, thiserror::Error)]
pub enum InventoryClientError {
    #[error("inventory {0:?} not found")]
    NotFound(String),
    #[error("inventory backend error: {0}")]
    Backend(String),
}

/// Storage interface for inventory records.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn get(&self, info: &InventoryInfo) -> Result<Option<InventoryRecord>, InventoryClientError>;
    async fn store(&self, record: &InventoryRecord) -> Result<(), InventoryClientError>;
    async fn delete(&self, info: &InventoryInfo) -> Result<(), InventoryClientError>;
    async fn list(&self) -> Result<Vec<InventoryRecord>, InventoryClientError>;
}

fn key(info: &InventoryInfo) -> (String, String) {
    (info.namespace.clone(), info.name.clone())
}

/// In-memory inventory store keyed by (namespace, name).
///
/// This is the default encoding from"one entry per object in a
/// mapping keyed by `group/kind/namespace/name` with empty values" -- here
/// realised as an in-process map rather than a serialized `ConfigMap`, since
/// the cluster-side storage format is an external concern.
#[derive(Default)]
pub struct InMemoryInventoryClient {
    records: Mutex<HashMap<(String, String), InventoryRecord>>,
}

impl InMemoryInventoryClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventoryClient {
    async fn get(&self, info: &InventoryInfo) -> Result<Option<InventoryRecord>, InventoryClientError> {
        let records = self.records.lock().expect("inventory store mutex poisoned");
        Ok(records.get(&key(info)).cloned())
    }

    async fn store(&self, record: &InventoryRecord) -> Result<(), InventoryClientError> {
        let mut records = self.records.lock().expect("inventory store mutex poisoned");
        records.insert(key(&record.info), record.clone());
        Ok(())
    }

    async fn delete(&self, info: &InventoryInfo) -> Result<(), InventoryClientError> {
        let mut records = self.records.lock().expect("inventory store mutex poisoned");
        records.remove(&key(info));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<InventoryRecord>, InventoryClientError> {
        let records = self.records.lock().expect("inventory store mutex poisoned");
        Ok(records.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectSet;

    fn info() -> InventoryInfo {
        InventoryInfo::new("default", "app-inventory", "inv-123")
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let client = InMemoryInventoryClient::new();
        let mut rec = InventoryRecord::new(info());
        let set: ObjectSet = [crate::object::ObjectId::new("apps", "Deployment", "default", "web")]
            .into_iter()
            .collect();
        rec.set_spec_objects(&set);

        client.store(&rec).await.unwrap();
        let fetched = client.get(&info()).await.unwrap().unwrap();
        assert_eq!(fetched.spec_object_set(), set);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let client = InMemoryInventoryClient::new();
        assert!(client.get(&info()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let client = InMemoryInventoryClient::new();
        let rec = InventoryRecord::new(info());
        client.store(&rec).await.unwrap();
        client.delete(&info()).await.unwrap();
        assert!(client.get(&info()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_returns_all_records() {
        let client = InMemoryInventoryClient::new();
        client.store(&InventoryRecord::new(info())).await.unwrap();
        client
            .store(&InventoryRecord::new(InventoryInfo::new(
                "other", "other-inventory", "inv-456",
            )))
            .await
            .unwrap();
        let all = client.list().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
