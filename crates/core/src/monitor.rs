//! Recurring extraction schedules for a (scraper, url) pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapelineError;
use crate::ids;
use crate::schedule::{compute_next_run, Schedule};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    /// Deterministic id, see [`ids::monitor_id`].
    pub id: String,
    pub scraper_id: String,
    pub url: String,
    pub schedule: Schedule,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub last_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// New active monitor whose first run is one schedule period after `now`.
    pub fn new(
        scraper_id: &str,
        url: &str,
        schedule: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Self, ScrapelineError> {
        let next_run = compute_next_run(now, &schedule)?;
        Ok(Self {
            id: ids::monitor_id(scraper_id, url),
            scraper_id: scraper_id.to_string(),
            url: url.to_string(),
            schedule,
            active: true,
            last_run: None,
            next_run,
            run_count: 0,
            last_job_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Re-registration: replace the schedule and reactivate, keeping history.
    pub fn reschedule(
        &mut self,
        schedule: Schedule,
        now: DateTime<Utc>,
    ) -> Result<(), ScrapelineError> {
        self.next_run = compute_next_run(now, &schedule)?;
        self.schedule = schedule;
        self.active = true;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run <= now
    }

    /// Record a scheduled run started at `now`.
    pub fn record_run(&mut self, job_id: &str, now: DateTime<Utc>) -> Result<(), ScrapelineError> {
        self.next_run = compute_next_run(now, &self.schedule)?;
        self.last_run = Some(now);
        self.run_count += 1;
        self.last_job_id = Some(job_id.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Record a caller-triggered run. The schedule and `run_count` are untouched.
    pub fn note_manual_run(&mut self, job_id: &str, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.last_job_id = Some(job_id.to_string());
        self.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.updated_at = now;
    }
}

/// Filter for listing monitors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorFilter {
    pub scraper_id: Option<String>,
    #[serde(default)]
    pub active_only: bool,
}

impl MonitorFilter {
    pub fn for_scraper(scraper_id: impl Into<String>) -> Self {
        Self {
            scraper_id: Some(scraper_id.into()),
            active_only: false,
        }
    }

    pub fn matches(&self, monitor: &Monitor) -> bool {
        if self.active_only && !monitor.active {
            return false;
        }
        match &self.scraper_id {
            Some(id) => monitor.scraper_id == *id,
            None => true,
        }
    }
}
