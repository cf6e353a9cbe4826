//! Saved scraper definitions: a named schema plus fetch options, an optional
//! recurring schedule and the urls it monitors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapelineError;
use crate::ids;
use crate::job::FetchOptions;
use crate::schedule::{Schedule, ScheduleSpec};
use crate::schema::ExtractionSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scraper {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schema: ExtractionSchema,
    #[serde(default)]
    pub options: FetchOptions,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    /// Normalized urls monitored on `schedule`.
    #[serde(default)]
    pub monitor_urls: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller input for registering a scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub schema: ExtractionSchema,
    #[serde(default)]
    pub options: FetchOptions,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
    #[serde(default)]
    pub monitor_urls: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Scraper {
    /// Validate a definition and assign it a fresh id.
    pub fn from_definition(
        def: ScraperDefinition,
        now: DateTime<Utc>,
    ) -> Result<Self, ScrapelineError> {
        let name = def.name.trim();
        if name.is_empty() {
            return Err(ScrapelineError::InvalidSchema("scraper name is required".into()));
        }
        def.schema.ensure_usable()?;

        let schedule = match &def.schedule {
            Some(spec) => spec.resolve()?,
            None => None,
        };

        // Spellings that normalize to the same url share one monitor.
        let mut monitor_urls: Vec<String> = Vec::with_capacity(def.monitor_urls.len());
        for raw in &def.monitor_urls {
            let url = ids::normalize_url(raw)?;
            if !monitor_urls.contains(&url) {
                monitor_urls.push(url);
            }
        }

        let webhook_url = match def.webhook_url.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(raw) => Some(ids::normalize_url(raw)?),
        };

        Ok(Self {
            id: ids::new_scraper_id(),
            name: name.to_string(),
            description: def.description,
            schema: def.schema,
            options: def.options,
            schedule,
            monitor_urls,
            webhook_url,
            created_at: now,
        })
    }

    /// Urls that get a monitor: all `monitor_urls` when a schedule is set.
    pub fn monitored_urls(&self) -> &[String] {
        if self.schedule.is_some() {
            &self.monitor_urls
        } else {
            &[]
        }
    }
}
