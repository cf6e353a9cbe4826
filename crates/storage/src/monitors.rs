use chrono::{DateTime, Utc};
use scrapeline_core::{Monitor, MonitorFilter};

use crate::error::StorageError;
use crate::kv::{get_json, list_json, put_json, Namespace, SharedKv};

#[derive(Clone)]
pub struct MonitorStore {
    kv: SharedKv,
}

impl MonitorStore {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    pub async fn get(&self, monitor_id: &str) -> Result<Option<Monitor>, StorageError> {
        get_json(self.kv.as_ref(), Namespace::Monitors, monitor_id).await
    }

    pub async fn save(&self, monitor: &Monitor) -> Result<(), StorageError> {
        put_json(self.kv.as_ref(), Namespace::Monitors, &monitor.id, monitor).await
    }

    /// Returns whether the monitor existed.
    pub async fn delete(&self, monitor_id: &str) -> Result<bool, StorageError> {
        self.kv.delete(Namespace::Monitors, monitor_id).await
    }

    /// Matching monitors, newest first.
    pub async fn list(&self, filter: &MonitorFilter) -> Result<Vec<Monitor>, StorageError> {
        let mut monitors: Vec<Monitor> = list_json(self.kv.as_ref(), Namespace::Monitors).await?;
        monitors.retain(|m| filter.matches(m));
        monitors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(monitors)
    }

    /// Active monitors with `next_run <= now`, most overdue first.
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Monitor>, StorageError> {
        let mut monitors: Vec<Monitor> = list_json(self.kv.as_ref(), Namespace::Monitors).await?;
        monitors.retain(|m| m.is_due(now));
        monitors.sort_by(|a, b| a.next_run.cmp(&b.next_run));
        Ok(monitors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone};
    use scrapeline_core::Schedule;

    use crate::memory::MemoryKvStore;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn monitor(scraper: &str, url: &str, created: DateTime<Utc>) -> Monitor {
        Monitor::new(scraper, url, Schedule::every_minutes(10).unwrap(), created).unwrap()
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let store = MonitorStore::new(Arc::new(MemoryKvStore::new()));
        let a = monitor("scr_a", "https://a.example/", t0());
        let b = monitor("scr_a", "https://b.example/", t0() + Duration::minutes(1));
        let mut c = monitor("scr_c", "https://c.example/", t0() + Duration::minutes(2));
        c.deactivate(t0());
        for m in [&a, &b, &c] {
            store.save(m).await.unwrap();
        }

        let all = store.list(&MonitorFilter::default()).await.unwrap();
        assert_eq!(all.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(), vec![
            c.id.as_str(),
            b.id.as_str(),
            a.id.as_str()
        ]);

        let scoped = store.list(&MonitorFilter::for_scraper("scr_a")).await.unwrap();
        assert_eq!(scoped.len(), 2);

        let active = store
            .list(&MonitorFilter { scraper_id: None, active_only: true })
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn due_returns_only_active_overdue_monitors() {
        let store = MonitorStore::new(Arc::new(MemoryKvStore::new()));
        let early = monitor("scr_a", "https://a.example/", t0());
        let late = monitor("scr_a", "https://b.example/", t0() + Duration::hours(1));
        let mut inactive = monitor("scr_a", "https://c.example/", t0());
        inactive.deactivate(t0());
        for m in [&early, &late, &inactive] {
            store.save(m).await.unwrap();
        }

        let due = store.due(t0() + Duration::minutes(10)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, early.id);
    }

    #[tokio::test]
    async fn delete_removes_monitor() {
        let store = MonitorStore::new(Arc::new(MemoryKvStore::new()));
        let m = monitor("scr_a", "https://a.example/", t0());
        store.save(&m).await.unwrap();
        assert!(store.delete(&m.id).await.unwrap());
        assert!(store.get(&m.id).await.unwrap().is_none());
        assert!(!store.delete(&m.id).await.unwrap());
    }
}
