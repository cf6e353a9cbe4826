//! Namespaced key/value abstraction every registry is built on.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Logical namespaces. Each one is a flat key → JSON record map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Scrapers,
    Jobs,
    Monitors,
    ContentCache,
    ExtractionCache,
    StagePayloads,
}

impl Namespace {
    pub const ALL: [Namespace; 6] = [
        Self::Scrapers,
        Self::Jobs,
        Self::Monitors,
        Self::ContentCache,
        Self::ExtractionCache,
        Self::StagePayloads,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scrapers => "scrapers",
            Self::Jobs => "jobs",
            Self::Monitors => "monitors",
            Self::ContentCache => "content_cache",
            Self::ExtractionCache => "extraction_cache",
            Self::StagePayloads => "stage_payloads",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte-level store. There are no cross-namespace transactions; a single
/// `put` replaces the whole record.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Returns whether the key existed.
    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StorageError>;

    /// All records in a namespace, ordered by key.
    async fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, StorageError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(ns, key).await
    }

    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        (**self).put(ns, key, value).await
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StorageError> {
        (**self).delete(ns, key).await
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        (**self).list(ns).await
    }
}

pub type SharedKv = Arc<dyn KeyValueStore>;

// ── JSON helpers ──────────────────────────────────────────────

pub async fn get_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    ns: Namespace,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match kv.get(ns, key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + Sync>(
    kv: &dyn KeyValueStore,
    ns: Namespace,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value)?;
    kv.put(ns, key, bytes).await
}

/// Decode every record in a namespace. Undecodable records are skipped with a warning.
pub async fn list_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    ns: Namespace,
) -> Result<Vec<T>, StorageError> {
    let records = kv.list(ns).await?;
    let mut out = Vec::with_capacity(records.len());
    for (key, bytes) in records {
        match serde_json::from_slice(&bytes) {
            Ok(value) => out.push(value),
            Err(e) => tracing::warn!(namespace = %ns, key = %key, error = %e, "skipping undecodable record"),
        }
    }
    Ok(out)
}
