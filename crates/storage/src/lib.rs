pub mod cache;
pub mod error;
pub mod jobs;
pub mod kv;
pub mod memory;
pub mod monitors;
pub mod object;
pub mod payloads;
pub mod scrapers;

use std::sync::Arc;

use tracing::info;

use scrapeline_core::config::{CacheConfig, StorageBackend};

pub use cache::{CacheStats, CacheStore, ContentEntry, ExtractionEntry};
pub use error::StorageError;
pub use jobs::JobStore;
pub use kv::{KeyValueStore, Namespace, SharedKv};
pub use memory::MemoryKvStore;
pub use monitors::MonitorStore;
pub use object::ObjectKvStore;
pub use payloads::{PayloadKind, PayloadStore};
pub use scrapers::ScraperStore;

/// Every registry the orchestration core needs, sharing one key/value backend.
#[derive(Clone)]
pub struct StorageEngine {
    pub kv: SharedKv,
    pub jobs: JobStore,
    pub monitors: MonitorStore,
    pub scrapers: ScraperStore,
    pub payloads: PayloadStore,
    pub cache: Arc<CacheStore>,
}

impl StorageEngine {
    /// Create a StorageEngine from config. Selects the memory or local backend.
    pub fn from_config(config: &scrapeline_core::Config) -> Result<Self, StorageError> {
        let kv: SharedKv = match config.storage.backend {
            StorageBackend::Memory => {
                info!("Storage: in-memory backend (records are not persisted)");
                Arc::new(MemoryKvStore::new())
            }
            StorageBackend::Local => Arc::new(ObjectKvStore::local(
                &config.storage.data_dir,
                &config.storage.prefix,
            )?),
        };
        Ok(Self::with_kv(kv, &config.cache))
    }

    /// Volatile engine with default cache settings.
    pub fn in_memory() -> Self {
        Self::with_kv(Arc::new(MemoryKvStore::new()), &CacheConfig::default())
    }

    pub fn with_kv(kv: SharedKv, cache: &CacheConfig) -> Self {
        Self {
            jobs: JobStore::new(kv.clone()),
            monitors: MonitorStore::new(kv.clone()),
            scrapers: ScraperStore::new(kv.clone()),
            payloads: PayloadStore::new(kv.clone()),
            cache: Arc::new(CacheStore::from_config(kv.clone(), cache)),
            kv,
        }
    }
}
