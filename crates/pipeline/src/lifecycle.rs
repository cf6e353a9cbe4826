//! Job lifecycle bookkeeping.
//!
//! [`JobTracker`] is the single writer of job records: every transition is
//! persisted first and then published, so a subscriber never sees a state the
//! store does not hold yet.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use scrapeline_core::{
    CacheType, Job, JobResult, JobStatus, JobTrigger, ScrapelineError, Stage, Usage,
};
use scrapeline_storage::JobStore;

use crate::error::Result;
use crate::progress::ProgressPublisher;

// ── Views ───────────────────────────────────────────────────────────

/// Caller-facing job status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub scraper_id: Option<String>,
    pub url: String,
    pub status: JobStatus,
    pub percent: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub stage: Option<Stage>,
    pub cached: bool,
    pub cache_type: Option<CacheType>,
    pub attempts: u32,
    pub trigger: JobTrigger,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            scraper_id: job.scraper_id.clone(),
            url: job.url.clone(),
            status: job.status,
            percent: job.percent,
            message: job.message.clone(),
            error: job.error.clone(),
            stage: job.stage,
            cached: job.cached,
            cache_type: job.cache_type,
            attempts: job.attempts,
            trigger: job.trigger,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// Caller-facing job result. `data` is only set once the job completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultView {
    pub job_id: String,
    pub url: String,
    pub status: JobStatus,
    pub data: Option<Value>,
    pub cached: bool,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    pub metadata: Map<String, Value>,
    pub error: Option<String>,
    pub stage: Option<Stage>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobResultView {
    fn from(job: &Job) -> Self {
        let result = job.result.as_ref();
        Self {
            job_id: job.id.clone(),
            url: job.url.clone(),
            status: job.status,
            data: result.map(|r| r.data.clone()),
            cached: result.map_or(job.cached, |r| r.cached),
            model: result.and_then(|r| r.model.clone()),
            usage: result.and_then(|r| r.usage.clone()),
            metadata: result.map(|r| r.metadata.clone()).unwrap_or_default(),
            error: job.error.clone(),
            stage: job.stage,
            completed_at: job.completed_at,
        }
    }
}

// ── Tracker ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct JobTracker {
    jobs: JobStore,
    progress: Arc<ProgressPublisher>,
}

impl JobTracker {
    pub fn new(jobs: JobStore, progress: Arc<ProgressPublisher>) -> Self {
        Self { jobs, progress }
    }

    pub fn progress(&self) -> &Arc<ProgressPublisher> {
        &self.progress
    }

    /// Persist a freshly queued job.
    pub async fn create(&self, job: &Job) -> Result<()> {
        self.commit(job).await?;
        info!(
            job_id = %job.id,
            url = %job.url,
            trigger = ?job.trigger,
            use_cache = job.options.use_cache,
            "job queued"
        );
        Ok(())
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.get(job_id).await?)
    }

    /// Load a job, `NotFound` if the id is unknown.
    pub async fn load(&self, job_id: &str) -> Result<Job> {
        self.find(job_id)
            .await?
            .ok_or_else(|| ScrapelineError::not_found("job", job_id).into())
    }

    /// Mark `stage` as running for delivery `attempt`.
    ///
    /// A redelivery finds the job already in the running status and only
    /// records the attempt.
    pub async fn enter(
        &self,
        job: &mut Job,
        stage: Stage,
        attempt: u32,
        message: &str,
    ) -> Result<()> {
        let running = stage.running_status();
        if job.status == running {
            job.attempts = attempt;
            job.updated_at = Utc::now();
            self.jobs.save(job).await?;
            debug!(job_id = %job.id, stage = %stage, attempt, "stage redelivered");
            return Ok(());
        }
        job.advance(running, message, Utc::now())?;
        job.attempts = attempt;
        self.commit(job).await
    }

    pub async fn advance(&self, job: &mut Job, next: JobStatus, message: &str) -> Result<()> {
        job.advance(next, message, Utc::now())?;
        self.commit(job).await
    }

    pub async fn complete(&self, job: &mut Job, result: JobResult, message: &str) -> Result<()> {
        job.complete(result, message, Utc::now())?;
        self.commit(job).await?;
        info!(
            job_id = %job.id,
            url = %job.url,
            cached = job.cached,
            cache_type = ?job.cache_type,
            "job completed"
        );
        Ok(())
    }

    /// Terminal failure. Returns `false` when the job had already finished.
    pub async fn fail(&self, job: &mut Job, stage: Stage, reason: &str) -> Result<bool> {
        if job.is_terminal() {
            debug!(job_id = %job.id, status = %job.status, "ignoring failure of finished job");
            return Ok(false);
        }
        job.fail(stage, reason, Utc::now())?;
        self.commit(job).await?;
        error!(
            job_id = %job.id,
            url = %job.url,
            stage = %stage,
            attempts = job.attempts,
            error = %reason,
            "job failed"
        );
        Ok(true)
    }

    async fn commit(&self, job: &Job) -> Result<()> {
        self.jobs.save(job).await?;
        self.progress.publish(job);
        Ok(())
    }
}
