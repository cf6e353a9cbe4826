//! Caller-facing operations: create and inspect jobs, manage monitors and
//! scrapers, follow progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use scrapeline_capabilities::Capabilities;
use scrapeline_core::config::PipelineConfig;
use scrapeline_core::{
    ids, Config, ExtractionSchema, FetchOptions, Job, JobOptions, JobStatus, JobTrigger, Monitor,
    MonitorFilter, Schedule, ScheduleSpec, Scraper, ScraperDefinition, ScrapelineError, Stage,
};
use scrapeline_storage::{PayloadKind, StorageEngine};

use crate::dispatcher::JobDispatcher;
use crate::error::{PipelineError, Result};
use crate::lifecycle::{JobResultView, JobStatusView, JobTracker};
use crate::progress::{ProgressPublisher, ProgressSubscription};
use crate::scheduler::MonitorScheduler;
use crate::stages::StageContext;

// ── Requests and responses ──────────────────────────────────────────

/// What a job extracts with: a saved scraper or a schema given inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTarget {
    Scraper(String),
    Inline(ExtractionSchema),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Return right after queueing instead of waiting for the result.
    #[serde(default, rename = "async")]
    pub run_async: bool,
    #[serde(default)]
    pub skip_monitoring: bool,
    /// Overrides the scraper's schedule. An empty expression removes the monitor.
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
    /// Overrides the scraper's fetch options.
    #[serde(default)]
    pub fetch: Option<FetchOptions>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            run_async: false,
            skip_monitoring: false,
            schedule: None,
            fetch: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub target: JobTarget,
    pub url: String,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorAction {
    Created,
    Updated,
    Removed,
}

/// Monitor state after a job request touched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringInfo {
    pub monitoring: bool,
    pub monitor_id: String,
    pub next_run: Option<DateTime<Utc>>,
    pub action: MonitorAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
    pub status: JobStatus,
    pub monitoring: Option<MonitoringInfo>,
    /// Terminal result, only in sync mode and only when it arrived in time.
    pub result: Option<JobResultView>,
}

/// Outcome of registering a scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredScraper {
    pub scraper: Scraper,
    pub monitor_ids: Vec<String>,
    pub warmup_job_ids: Vec<String>,
}

/// Monitor change requested alongside a job.
#[derive(Debug)]
enum MonitorPlan {
    Keep(Schedule),
    Remove,
}

// ── Service ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ExtractionService {
    storage: StorageEngine,
    tracker: JobTracker,
    dispatcher: JobDispatcher,
    config: PipelineConfig,
}

impl ExtractionService {
    pub fn new(storage: StorageEngine, caps: Capabilities, config: PipelineConfig) -> Self {
        let tracker = JobTracker::new(storage.jobs.clone(), Arc::new(ProgressPublisher::default()));
        let dispatcher = JobDispatcher::new(StageContext {
            storage: storage.clone(),
            caps,
            tracker: tracker.clone(),
            config: config.clone(),
        });
        Self {
            storage,
            tracker,
            dispatcher,
            config,
        }
    }

    /// Storage backend and reference adapters selected by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = StorageEngine::from_config(config)?;
        let caps = Capabilities::from_config(config)?;
        Ok(Self::new(storage, caps, config.pipeline.clone()))
    }

    pub fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// Monitor scheduler sharing this service's storage and lanes.
    pub fn scheduler(&self, interval: Duration) -> MonitorScheduler {
        MonitorScheduler::new(
            self.storage.clone(),
            self.tracker.clone(),
            self.dispatcher.clone(),
            interval,
        )
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    /// Queue an extraction job. In sync mode, wait for its result.
    pub async fn create_job(&self, request: JobRequest) -> Result<JobTicket> {
        let url = ids::normalize_url(&request.url)?;
        let options = request.options;
        let now = Utc::now();

        let (scraper, schema, fetch) = match request.target {
            JobTarget::Scraper(scraper_id) => {
                let scraper = self.load_scraper(&scraper_id).await?;
                let schema = scraper.schema.clone();
                let fetch = options.fetch.clone().unwrap_or_else(|| scraper.options.clone());
                (Some(scraper), schema, fetch)
            }
            JobTarget::Inline(schema) => {
                schema.ensure_usable()?;
                if options.schedule.is_some() {
                    return Err(ScrapelineError::InvalidSchedule(
                        "a schedule requires a saved scraper".into(),
                    )
                    .into());
                }
                (None, schema, options.fetch.clone().unwrap_or_default())
            }
        };

        // Validate the schedule before anything is written.
        let plan = match &scraper {
            Some(scraper) if !options.skip_monitoring => monitor_plan(scraper, options.schedule.as_ref())?,
            _ => None,
        };

        let job = Job::new(
            url.clone(),
            schema,
            scraper.as_ref().map(|s| s.id.clone()),
            JobOptions {
                use_cache: options.use_cache,
                fetch,
            },
            JobTrigger::Manual,
            now,
        );
        // Monitor first: if its write fails, no job is left queued behind it.
        let monitoring = match (scraper.as_ref(), plan) {
            (Some(scraper), Some(plan)) => Some(self.apply_monitor_plan(scraper, &url, plan, &job.id, now).await?),
            _ => None,
        };
        self.tracker.create(&job).await?;

        if options.run_async {
            self.dispatcher.submit(&job)?;
            return Ok(JobTicket {
                job_id: job.id,
                status: JobStatus::Queued,
                monitoring,
                result: None,
            });
        }

        // Listen before dispatching so the terminal update cannot slip past.
        let rx = self.tracker.progress().listen(&job.id);
        self.dispatcher.submit(&job)?;
        let snapshot = self.tracker.load(&job.id).await?;
        let subscription = self.tracker.progress().attach(rx, &snapshot);
        let result = self
            .await_terminal(&job.id, subscription, self.config.sync_timeout())
            .await?;

        let status = match &result {
            Some(view) => view.status,
            None => self.tracker.load(&job.id).await?.status,
        };
        Ok(JobTicket {
            job_id: job.id,
            status,
            monitoring,
            result,
        })
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusView> {
        let job = self.tracker.load(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn get_job_result(&self, job_id: &str) -> Result<JobResultView> {
        let job = self.tracker.load(job_id).await?;
        Ok(JobResultView::from(&job))
    }

    /// Current snapshot followed by live updates until the job finishes.
    pub async fn subscribe(&self, job_id: &str) -> Result<ProgressSubscription> {
        // Unknown ids fail before a channel is opened for them.
        self.tracker.load(job_id).await?;
        let rx = self.tracker.progress().listen(job_id);
        let snapshot = self.tracker.load(job_id).await?;
        Ok(self.tracker.progress().attach(rx, &snapshot))
    }

    /// Wait up to `timeout` for a job to finish. `None` if it is still running.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<JobResultView>> {
        let subscription = self.subscribe(job_id).await?;
        self.await_terminal(job_id, subscription, timeout).await
    }

    async fn await_terminal(
        &self,
        job_id: &str,
        mut subscription: ProgressSubscription,
        timeout: Duration,
    ) -> Result<Option<JobResultView>> {
        match tokio::time::timeout(timeout, subscription.wait_terminal()).await {
            Ok(Some(_)) => {
                let job = self.tracker.load(job_id).await?;
                Ok(Some(JobResultView::from(&job)))
            }
            Ok(None) => Ok(None),
            Err(_) => {
                debug!(job_id, timeout = ?timeout, "job still running after sync wait");
                Ok(None)
            }
        }
    }

    /// Re-dispatch every unfinished job from its last durable stage.
    ///
    /// Jobs whose stage input was lost are failed. Returns how many were resumed.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let mut resumed = 0;
        for mut job in self.storage.jobs.list_incomplete().await? {
            if let Some((kind, stage, reason)) = required_payload(job.status) {
                let present = self
                    .storage
                    .payloads
                    .get::<serde_json::Value>(&job.id, kind)
                    .await?
                    .is_some();
                if !present {
                    warn!(job_id = %job.id, status = %job.status, "stage payload missing, failing job");
                    self.tracker.fail(&mut job, stage, reason).await?;
                    continue;
                }
            }
            self.dispatcher.submit(&job)?;
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "resumed incomplete jobs");
        }
        Ok(resumed)
    }

    // ── Monitors ─────────────────────────────────────────────────────

    /// Matching monitors, newest first.
    pub async fn list_monitors(&self, filter: &MonitorFilter) -> Result<Vec<Monitor>> {
        Ok(self.storage.monitors.list(filter).await?)
    }

    pub async fn delete_monitor(&self, monitor_id: &str) -> Result<()> {
        if !self.storage.monitors.delete(monitor_id).await? {
            return Err(ScrapelineError::not_found("monitor", monitor_id).into());
        }
        info!(monitor_id, "monitor deleted");
        Ok(())
    }

    async fn apply_monitor_plan(
        &self,
        scraper: &Scraper,
        url: &str,
        plan: MonitorPlan,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MonitoringInfo> {
        let monitor_id = ids::monitor_id(&scraper.id, url);
        let schedule = match plan {
            MonitorPlan::Remove => {
                let removed = self.storage.monitors.delete(&monitor_id).await?;
                debug!(monitor_id = %monitor_id, removed, "monitoring disabled by request");
                return Ok(MonitoringInfo {
                    monitoring: false,
                    monitor_id,
                    next_run: None,
                    action: MonitorAction::Removed,
                });
            }
            MonitorPlan::Keep(schedule) => schedule,
        };

        let (mut monitor, action) = match self.storage.monitors.get(&monitor_id).await? {
            Some(mut existing) => {
                existing.reschedule(schedule, now)?;
                (existing, MonitorAction::Updated)
            }
            None => (Monitor::new(&scraper.id, url, schedule, now)?, MonitorAction::Created),
        };
        monitor.note_manual_run(job_id, now);
        self.storage.monitors.save(&monitor).await?;

        info!(
            monitor_id = %monitor.id,
            scraper_id = %scraper.id,
            url,
            schedule = %monitor.schedule.describe(),
            next_run = %monitor.next_run,
            action = ?action,
            "monitor registered"
        );
        Ok(MonitoringInfo {
            monitoring: true,
            monitor_id: monitor.id,
            next_run: Some(monitor.next_run),
            action,
        })
    }

    // ── Scrapers ─────────────────────────────────────────────────────

    /// Store a scraper, create its monitors and queue one cache-warming job per
    /// monitored url.
    pub async fn register_scraper(&self, definition: ScraperDefinition) -> Result<RegisteredScraper> {
        let now = Utc::now();
        let scraper = Scraper::from_definition(definition, now)?;
        self.storage.scrapers.save(&scraper).await?;

        let mut monitor_ids = Vec::new();
        let mut warmup_job_ids = Vec::new();
        if let Some(schedule) = &scraper.schedule {
            for url in scraper.monitored_urls() {
                let monitor = Monitor::new(&scraper.id, url, schedule.clone(), now)?;
                self.storage.monitors.save(&monitor).await?;
                monitor_ids.push(monitor.id);

                let job = Job::new(
                    url.clone(),
                    scraper.schema.clone(),
                    Some(scraper.id.clone()),
                    JobOptions {
                        use_cache: false,
                        fetch: scraper.options.clone(),
                    },
                    JobTrigger::Warmup,
                    now,
                );
                self.tracker.create(&job).await?;
                self.dispatcher.submit(&job)?;
                warmup_job_ids.push(job.id);
            }
        }

        info!(
            scraper_id = %scraper.id,
            name = %scraper.name,
            monitors = monitor_ids.len(),
            "scraper registered"
        );
        Ok(RegisteredScraper {
            scraper,
            monitor_ids,
            warmup_job_ids,
        })
    }

    pub async fn get_scraper(&self, scraper_id: &str) -> Result<Scraper> {
        self.load_scraper(scraper_id).await
    }

    pub async fn list_scrapers(&self) -> Result<Vec<Scraper>> {
        Ok(self.storage.scrapers.list().await?)
    }

    /// Remove a scraper. Its monitors are deactivated by the next scheduler tick.
    pub async fn delete_scraper(&self, scraper_id: &str) -> Result<()> {
        if !self.storage.scrapers.delete(scraper_id).await? {
            return Err(ScrapelineError::not_found("scraper", scraper_id).into());
        }
        info!(scraper_id, "scraper deleted");
        Ok(())
    }

    async fn load_scraper(&self, scraper_id: &str) -> Result<Scraper> {
        self.storage
            .scrapers
            .get(scraper_id)
            .await?
            .ok_or_else(|| PipelineError::from(ScrapelineError::not_found("scraper", scraper_id)))
    }
}

/// Monitor change for a scraper job: the explicit schedule wins over the
/// scraper's own. `None` leaves monitors alone.
fn monitor_plan(scraper: &Scraper, explicit: Option<&ScheduleSpec>) -> Result<Option<MonitorPlan>> {
    match explicit {
        Some(spec) => Ok(Some(match spec.resolve()? {
            Some(schedule) => MonitorPlan::Keep(schedule),
            None => MonitorPlan::Remove,
        })),
        None => Ok(scraper.schedule.clone().map(MonitorPlan::Keep)),
    }
}

/// Stage input a job in `status` needs before it can be resumed.
fn required_payload(status: JobStatus) -> Option<(PayloadKind, Stage, &'static str)> {
    match status {
        JobStatus::Fetched | JobStatus::Extracting => {
            Some((PayloadKind::Fetch, Stage::Extracting, "Fetch payload not found"))
        }
        JobStatus::Extracted | JobStatus::Validating => {
            Some((PayloadKind::Extract, Stage::Validating, "Extraction payload not found"))
        }
        _ => None,
    }
}
