use scrapeline_core::Scraper;

use crate::error::StorageError;
use crate::kv::{get_json, list_json, put_json, Namespace, SharedKv};

#[derive(Clone)]
pub struct ScraperStore {
    kv: SharedKv,
}

impl ScraperStore {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    pub async fn get(&self, scraper_id: &str) -> Result<Option<Scraper>, StorageError> {
        get_json(self.kv.as_ref(), Namespace::Scrapers, scraper_id).await
    }

    pub async fn save(&self, scraper: &Scraper) -> Result<(), StorageError> {
        put_json(self.kv.as_ref(), Namespace::Scrapers, &scraper.id, scraper).await
    }

    pub async fn delete(&self, scraper_id: &str) -> Result<bool, StorageError> {
        self.kv.delete(Namespace::Scrapers, scraper_id).await
    }

    /// All scrapers, newest first.
    pub async fn list(&self) -> Result<Vec<Scraper>, StorageError> {
        let mut scrapers: Vec<Scraper> = list_json(self.kv.as_ref(), Namespace::Scrapers).await?;
        scrapers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(scrapers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use scrapeline_core::{ExtractionSchema, FetchOptions, ScraperDefinition};
    use serde_json::json;

    use crate::memory::MemoryKvStore;

    #[tokio::test]
    async fn save_get_delete() {
        let store = ScraperStore::new(Arc::new(MemoryKvStore::new()));
        let scraper = Scraper::from_definition(
            ScraperDefinition {
                name: "Products".into(),
                description: Some("catalog pages".into()),
                schema: ExtractionSchema::Structured(json!({"name": "string", "price": "number"})),
                options: FetchOptions::default(),
                schedule: None,
                monitor_urls: vec![],
                webhook_url: None,
            },
            Utc::now(),
        )
        .unwrap();

        store.save(&scraper).await.unwrap();
        assert_eq!(store.get(&scraper.id).await.unwrap(), Some(scraper.clone()));
        assert_eq!(store.list().await.unwrap().len(), 1);

        assert!(store.delete(&scraper.id).await.unwrap());
        assert!(store.get(&scraper.id).await.unwrap().is_none());
    }
}
