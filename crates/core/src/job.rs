//! Job record and its lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScrapelineError;
use crate::ids;
use crate::schema::ExtractionSchema;

/// Longest error excerpt carried in a failure progress message.
const FAILURE_MESSAGE_EXCERPT: usize = 100;

// ── Status ────────────────────────────────────────────────────

/// Lifecycle state of a job.
///
/// `queued → fetching → fetched → extracting → extracted → validating → completed`,
/// or `failed` from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Fetching,
    Fetched,
    Extracting,
    Extracted,
    Validating,
    Completed,
    Failed,
}

impl JobStatus {
    /// Position in the forward order. `Failed` sorts last.
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Fetching => 1,
            Self::Fetched => 2,
            Self::Extracting => 3,
            Self::Extracted => 4,
            Self::Validating => 5,
            Self::Completed => 6,
            Self::Failed => 7,
        }
    }

    /// Fixed progress percentage. `None` for `Failed`, which keeps the prior value.
    pub const fn progress(self) -> Option<u8> {
        match self {
            Self::Queued => Some(0),
            Self::Fetching => Some(20),
            Self::Fetched => Some(40),
            Self::Extracting => Some(60),
            Self::Extracted => Some(80),
            Self::Validating => Some(90),
            Self::Completed => Some(100),
            Self::Failed => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.ordinal() > self.ordinal()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a job can fail in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Extracting,
    Validating,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Validating => "validating",
        }
    }

    /// Status a job holds while this stage runs.
    pub const fn running_status(self) -> JobStatus {
        match self {
            Self::Fetching => JobStatus::Fetching,
            Self::Extracting => JobStatus::Extracting,
            Self::Validating => JobStatus::Validating,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    Extraction,
    Content,
}

/// What created the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTrigger {
    Manual,
    Scheduled,
    Warmup,
}

// ── Options and results ───────────────────────────────────────

/// Options forwarded to the content source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchOptions {
    pub timeout_ms: u64,
    /// Time to let client-side rendering settle, for sources that support it.
    pub wait_for_ms: u64,
    /// Skip the primary source and use the plain HTTP fallback.
    pub use_simple_scraper: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            wait_for_ms: 2_000,
            use_simple_scraper: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub fetch: FetchOptions,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            fetch: FetchOptions::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Token accounting reported by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub data: Value,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub cached: bool,
    pub completed_at: DateTime<Utc>,
}

// ── Job ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub scraper_id: Option<String>,
    pub url: String,
    pub schema: ExtractionSchema,
    pub options: JobOptions,
    pub trigger: JobTrigger,
    pub status: JobStatus,
    pub percent: u8,
    pub message: Option<String>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Stage the job failed in (only set when `status == failed`).
    pub stage: Option<Stage>,
    pub cached: bool,
    pub cache_type: Option<CacheType>,
    /// Delivery attempt of the stage currently running.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a queued job. `url` must already be normalized.
    pub fn new(
        url: String,
        schema: ExtractionSchema,
        scraper_id: Option<String>,
        options: JobOptions,
        trigger: JobTrigger,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ids::new_job_id(),
            scraper_id,
            url,
            schema,
            options,
            trigger,
            status: JobStatus::Queued,
            percent: 0,
            message: Some("Job queued".into()),
            result: None,
            error: None,
            stage: None,
            cached: false,
            cache_type: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a non-terminal status further along the pipeline.
    pub fn advance(
        &mut self,
        next: JobStatus,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ScrapelineError> {
        if next.is_terminal() || !self.status.can_advance_to(next) {
            return Err(self.invalid_transition(next));
        }
        self.set_status(next, now);
        self.message = Some(message.into());
        Ok(())
    }

    /// Terminal success with the stored result.
    pub fn complete(
        &mut self,
        result: JobResult,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ScrapelineError> {
        if !self.status.can_advance_to(JobStatus::Completed) {
            return Err(self.invalid_transition(JobStatus::Completed));
        }
        self.set_status(JobStatus::Completed, now);
        self.message = Some(message.into());
        self.completed_at = Some(result.completed_at);
        self.result = Some(result);
        self.error = None;
        Ok(())
    }

    /// Terminal failure. `percent` keeps the value reached so far.
    pub fn fail(
        &mut self,
        stage: Stage,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ScrapelineError> {
        if !self.status.can_advance_to(JobStatus::Failed) {
            return Err(self.invalid_transition(JobStatus::Failed));
        }
        let error = error.into();
        self.set_status(JobStatus::Failed, now);
        self.message = Some(format!("[{}] {}", stage, excerpt(&error)));
        self.error = Some(error);
        self.stage = Some(stage);
        self.result = None;
        Ok(())
    }

    pub fn mark_cached(&mut self, cache_type: CacheType) {
        self.cached = true;
        self.cache_type = Some(cache_type);
    }

    fn set_status(&mut self, status: JobStatus, now: DateTime<Utc>) {
        if let Some(p) = status.progress() {
            self.percent = self.percent.max(p);
        }
        self.status = status;
        self.updated_at = now;
    }

    fn invalid_transition(&self, next: JobStatus) -> ScrapelineError {
        ScrapelineError::InvalidTransition {
            from: self.status.to_string(),
            to: next.to_string(),
        }
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(FAILURE_MESSAGE_EXCERPT) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_job() -> Job {
        Job::new(
            "https://example.com/".into(),
            ExtractionSchema::Structured(json!({"title": ["string"]})),
            None,
            JobOptions::default(),
            JobTrigger::Manual,
            Utc::now(),
        )
    }

    fn make_result(data: Value) -> JobResult {
        JobResult {
            data,
            model: Some("test-model".into()),
            usage: None,
            metadata: Map::new(),
            cached: false,
            completed_at: Utc::now(),
        }
    }

    // -- status table ------------------------------------------------------

    #[test]
    fn progress_table() {
        assert_eq!(JobStatus::Queued.progress(), Some(0));
        assert_eq!(JobStatus::Fetching.progress(), Some(20));
        assert_eq!(JobStatus::Fetched.progress(), Some(40));
        assert_eq!(JobStatus::Extracting.progress(), Some(60));
        assert_eq!(JobStatus::Extracted.progress(), Some(80));
        assert_eq!(JobStatus::Validating.progress(), Some(90));
        assert_eq!(JobStatus::Completed.progress(), Some(100));
        assert_eq!(JobStatus::Failed.progress(), None);
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(JobStatus::Queued.can_advance_to(JobStatus::Fetching));
        assert!(JobStatus::Queued.can_advance_to(JobStatus::Completed));
        assert!(!JobStatus::Fetched.can_advance_to(JobStatus::Fetching));
        assert!(!JobStatus::Fetching.can_advance_to(JobStatus::Fetching));
        assert!(JobStatus::Validating.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Completed));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&JobStatus::Extracting).unwrap(), "\"extracting\"");
        assert_eq!(serde_json::to_string(&Stage::Validating).unwrap(), "\"validating\"");
    }

    // -- job lifecycle -----------------------------------------------------

    #[test]
    fn full_run_reaches_100_percent() {
        let mut job = make_job();
        let now = Utc::now();
        for status in [
            JobStatus::Fetching,
            JobStatus::Fetched,
            JobStatus::Extracting,
            JobStatus::Extracted,
            JobStatus::Validating,
        ] {
            let before = job.percent;
            job.advance(status, status.as_str(), now).unwrap();
            assert!(job.percent >= before);
        }
        job.complete(make_result(json!({"title": ["a"]})), "done", now).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.percent, 100);
        assert!(job.completed_at.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn advance_rejects_backwards_and_terminal_targets() {
        let mut job = make_job();
        let now = Utc::now();
        job.advance(JobStatus::Fetched, "fetched", now).unwrap();
        assert!(job.advance(JobStatus::Fetching, "again", now).is_err());
        assert!(job.advance(JobStatus::Completed, "skip", now).is_err());
        assert!(job.advance(JobStatus::Failed, "skip", now).is_err());
        assert_eq!(job.status, JobStatus::Fetched);
    }

    #[test]
    fn fail_retains_percent_and_records_stage() {
        let mut job = make_job();
        let now = Utc::now();
        job.advance(JobStatus::Fetching, "fetching", now).unwrap();
        job.fail(Stage::Fetching, "Request timeout", now).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.percent, 20);
        assert_eq!(job.stage, Some(Stage::Fetching));
        assert_eq!(job.error.as_deref(), Some("Request timeout"));
        assert_eq!(job.message.as_deref(), Some("[fetching] Request timeout"));
    }

    #[test]
    fn terminal_jobs_cannot_change() {
        let mut job = make_job();
        let now = Utc::now();
        job.fail(Stage::Fetching, "boom", now).unwrap();
        assert!(job.fail(Stage::Extracting, "again", now).is_err());
        assert!(job
            .complete(make_result(json!({})), "late", now)
            .is_err());
        assert_eq!(job.stage, Some(Stage::Fetching));
    }

    #[test]
    fn failure_message_is_truncated() {
        let mut job = make_job();
        let long = "x".repeat(500);
        job.fail(Stage::Extracting, long.clone(), Utc::now()).unwrap();
        assert_eq!(job.error.as_deref(), Some(long.as_str()));
        assert_eq!(job.message.as_ref().unwrap().len(), "[extracting] ".len() + 100);
    }

    #[test]
    fn options_default_use_cache() {
        let opts: JobOptions = serde_json::from_value(json!({})).unwrap();
        assert!(opts.use_cache);
        assert_eq!(opts.fetch.timeout_ms, 30_000);
        assert_eq!(opts.fetch.wait_for_ms, 2_000);
    }
}
