use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::info;

use crate::error::StorageError;
use crate::kv::{KeyValueStore, Namespace};

const RECORD_SUFFIX: &str = ".json";

/// Key/value store over any `object_store` backend.
///
/// Records live at `{prefix}/{namespace}/{key}.json`.
pub struct ObjectKvStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectKvStore {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// Local filesystem backend rooted at `data_dir`, created if missing.
    pub fn local(data_dir: &Path, prefix: &str) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let canonical = std::fs::canonicalize(data_dir).unwrap_or_else(|_| data_dir.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)
            .map_err(|e| StorageError::Other(format!("local filesystem error: {e}")))?;
        info!("Storage: local backend at {}", canonical.display());
        Ok(Self::new(Arc::new(store), prefix))
    }

    /// Volatile object store, mainly for tests.
    pub fn in_memory(prefix: &str) -> Self {
        Self::new(Arc::new(InMemory::new()), prefix)
    }

    fn namespace_path(&self, ns: Namespace) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(ns.as_str())
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, ns.as_str()))
        }
    }

    fn record_path(&self, ns: Namespace, key: &str) -> ObjectPath {
        self.namespace_path(ns)
            .child(format!("{key}{RECORD_SUFFIX}"))
    }
}

#[async_trait]
impl KeyValueStore for ObjectKvStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.store.get(&self.record_path(ns, key)).await {
            Ok(result) => Ok(Some(result.bytes().await?.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.store
            .put(&self.record_path(ns, key), PutPayload::from(value))
            .await?;
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StorageError> {
        let path = self.record_path(ns, key);
        match self.store.head(&path).await {
            Ok(_) => {}
            Err(object_store::Error::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let prefix = self.namespace_path(ns);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut records = Vec::with_capacity(metas.len());
        for meta in metas {
            let Some(key) = meta
                .location
                .filename()
                .and_then(|name| name.strip_suffix(RECORD_SUFFIX))
                .map(str::to_string)
            else {
                continue;
            };
            match self.store.get(&meta.location).await {
                Ok(result) => records.push((key, result.bytes().await?.to_vec())),
                // Deleted between list and get.
                Err(object_store::Error::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}
