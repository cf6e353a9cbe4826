use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::kv::{KeyValueStore, Namespace};

/// In-process store used by tests and the `memory` backend.
#[derive(Default)]
pub struct MemoryKvStore {
    namespaces: RwLock<HashMap<Namespace, IndexMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a namespace.
    pub async fn len(&self, ns: Namespace) -> usize {
        self.namespaces
            .read()
            .await
            .get(&ns)
            .map_or(0, IndexMap::len)
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let guard = self.namespaces.read().await;
        Ok(guard.get(&ns).and_then(|m| m.get(key)).cloned())
    }

    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut guard = self.namespaces.write().await;
        guard.entry(ns).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StorageError> {
        let mut guard = self.namespaces.write().await;
        Ok(guard
            .get_mut(&ns)
            .and_then(|m| m.shift_remove(key))
            .is_some())
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let guard = self.namespaces.read().await;
        let mut records: Vec<(String, Vec<u8>)> = guard
            .get(&ns)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}
