//! Two-level result cache: page content per url, extraction result per
//! (url, schema). Advisory only: any backend error degrades to a miss.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use scrapeline_core::config::CacheConfig;
use scrapeline_core::{ids, CachePolicy, ExtractionSchema, Usage};

use crate::kv::{Namespace, SharedKv};

/// Normalized page text for a url.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub url: String,
    pub text: String,
    /// SHA-256 of `text`.
    pub digest: String,
    /// Content source that produced the text.
    pub source: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub captured_at: DateTime<Utc>,
}

impl ContentEntry {
    pub fn new(
        url: &str,
        text: String,
        source: &str,
        metadata: Map<String, Value>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.to_string(),
            digest: ids::sha256_hex(&text),
            text,
            source: source.to_string(),
            metadata,
            captured_at,
        }
    }
}

/// Validated extraction result for a (url, schema) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionEntry {
    pub url: String,
    pub data: Value,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub scraper_id: Option<String>,
    /// Digest of the content the data was extracted from.
    pub content_digest: Option<String>,
    pub captured_at: DateTime<Utc>,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub content_hits: u64,
    pub content_misses: u64,
    pub extraction_hits: u64,
    pub extraction_misses: u64,
    /// Extraction entries skipped because newer content replaced their source.
    pub stale_skips: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    content_hits: AtomicU64,
    content_misses: AtomicU64,
    extraction_hits: AtomicU64,
    extraction_misses: AtomicU64,
    stale_skips: AtomicU64,
    errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

type HotTier = Mutex<LruCache<(Namespace, String), Vec<u8>>>;

pub struct CacheStore {
    kv: SharedKv,
    policy: CachePolicy,
    hot: Option<HotTier>,
    counters: Counters,
}

impl CacheStore {
    /// `hot_capacity == 0` disables the in-process tier.
    pub fn new(kv: SharedKv, policy: CachePolicy, hot_capacity: usize) -> Self {
        Self {
            kv,
            policy,
            hot: NonZeroUsize::new(hot_capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            counters: Counters::default(),
        }
    }

    pub fn from_config(kv: SharedKv, config: &CacheConfig) -> Self {
        Self::new(kv, config.staleness, config.hot_capacity)
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            content_hits: c.content_hits.load(Ordering::Relaxed),
            content_misses: c.content_misses.load(Ordering::Relaxed),
            extraction_hits: c.extraction_hits.load(Ordering::Relaxed),
            extraction_misses: c.extraction_misses.load(Ordering::Relaxed),
            stale_skips: c.stale_skips.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }

    // ── Content ───────────────────────────────────────────────

    pub async fn get_content(&self, url: &str) -> Option<ContentEntry> {
        let key = ids::content_key(url);
        let entry = self.read::<ContentEntry>(Namespace::ContentCache, &key).await;
        match &entry {
            Some(_) => {
                bump(&self.counters.content_hits);
                debug!(url, "content cache hit");
            }
            None => {
                bump(&self.counters.content_misses);
                debug!(url, "content cache miss");
            }
        }
        entry
    }

    pub async fn put_content(&self, entry: &ContentEntry) {
        let key = ids::content_key(&entry.url);
        self.write(Namespace::ContentCache, &key, entry).await;
    }

    // ── Extraction ────────────────────────────────────────────

    /// Extraction entry for (url, schema), subject to the staleness policy.
    pub async fn get_extraction(
        &self,
        url: &str,
        schema: &ExtractionSchema,
    ) -> Option<ExtractionEntry> {
        let key = ids::extraction_key(url, schema);
        let Some(entry) = self.read::<ExtractionEntry>(Namespace::ExtractionCache, &key).await else {
            bump(&self.counters.extraction_misses);
            debug!(url, "extraction cache miss");
            return None;
        };

        if self.policy == CachePolicy::RequireFreshContent && self.is_stale(url, &entry).await {
            bump(&self.counters.stale_skips);
            bump(&self.counters.extraction_misses);
            debug!(url, "extraction cache entry predates current content");
            return None;
        }

        bump(&self.counters.extraction_hits);
        debug!(url, "extraction cache hit");
        Some(entry)
    }

    pub async fn put_extraction(&self, schema: &ExtractionSchema, entry: &ExtractionEntry) {
        let key = ids::extraction_key(&entry.url, schema);
        self.write(Namespace::ExtractionCache, &key, entry).await;
    }

    /// An entry is stale when the current content for its url has a different digest.
    async fn is_stale(&self, url: &str, entry: &ExtractionEntry) -> bool {
        let Some(derived_from) = entry.content_digest.as_deref() else {
            return false;
        };
        let key = ids::content_key(url);
        match self.read::<ContentEntry>(Namespace::ContentCache, &key).await {
            Some(current) => current.digest != derived_from,
            None => false,
        }
    }

    // ── Raw access ────────────────────────────────────────────

    async fn read<T: DeserializeOwned>(&self, ns: Namespace, key: &str) -> Option<T> {
        let bytes = match self.hot_get(ns, key) {
            Some(bytes) => bytes,
            None => match self.kv.get(ns, key).await {
                Ok(Some(bytes)) => {
                    self.hot_put(ns, key, bytes.clone());
                    bytes
                }
                Ok(None) => return None,
                Err(e) => {
                    bump(&self.counters.errors);
                    warn!(namespace = %ns, error = %e, "cache read failed, treating as miss");
                    return None;
                }
            },
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                bump(&self.counters.errors);
                warn!(namespace = %ns, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    async fn write<T: Serialize + Sync>(&self, ns: Namespace, key: &str, value: &T) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                bump(&self.counters.errors);
                warn!(namespace = %ns, error = %e, "cache entry encoding failed");
                return;
            }
        };
        match self.kv.put(ns, key, bytes.clone()).await {
            Ok(()) => self.hot_put(ns, key, bytes),
            Err(e) => {
                bump(&self.counters.errors);
                // Drop the hot copy so readers never see a value the backend lacks.
                self.hot_remove(ns, key);
                warn!(namespace = %ns, error = %e, "cache write failed");
            }
        }
    }

    fn hot_get(&self, ns: Namespace, key: &str) -> Option<Vec<u8>> {
        let hot = self.hot.as_ref()?;
        let mut lru = hot.lock().unwrap_or_else(PoisonError::into_inner);
        lru.get(&(ns, key.to_string())).cloned()
    }

    fn hot_put(&self, ns: Namespace, key: &str, bytes: Vec<u8>) {
        if let Some(hot) = &self.hot {
            let mut lru = hot.lock().unwrap_or_else(PoisonError::into_inner);
            lru.put((ns, key.to_string()), bytes);
        }
    }

    fn hot_remove(&self, ns: Namespace, key: &str) {
        if let Some(hot) = &self.hot {
            let mut lru = hot.lock().unwrap_or_else(PoisonError::into_inner);
            lru.pop(&(ns, key.to_string()));
        }
    }
}
