//! The three pipeline stages and what they hand to each other.
//!
//! Stage messages carry only a [`StageTicket`]. Everything else (url, schema,
//! intermediate output) is read from storage, so a redelivered or resumed
//! message sees exactly what the previous attempt persisted.

pub mod extract;
pub mod fetch;
pub mod store;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use scrapeline_capabilities::{Capabilities, CapabilityError};
use scrapeline_core::config::PipelineConfig;
use scrapeline_core::{Job, JobStatus, ScrapelineError, Stage, Usage};
use scrapeline_relay::{topics, RelayError, Retryable};
use scrapeline_storage::{StorageEngine, StorageError};

use crate::error::PipelineError;
use crate::lifecycle::{JobResultView, JobStatusView, JobTracker};

// ── Messages and payloads ───────────────────────────────────────────

/// Body of every stage message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTicket {
    pub job_id: String,
}

/// Normalized page text written by the fetch stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchPayload {
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: String,
    pub content_digest: String,
}

/// Extractor output written by the extract stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractPayload {
    pub data: Value,
    pub model: Option<String>,
    pub usage: Option<Usage>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub source: String,
    pub content_digest: String,
}

/// What the dispatcher does after a stage returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Publish a follow-up on this topic.
    Next(&'static str),
    /// Nothing left to run for this job.
    Finished,
}

/// Topic that runs the next stage for a job in `status`. `None` once terminal.
pub fn topic_for_status(status: JobStatus) -> Option<&'static str> {
    match status {
        JobStatus::Queued | JobStatus::Fetching => Some(topics::EXTRACTION_REQUESTED),
        JobStatus::Fetched | JobStatus::Extracting => Some(topics::WEBPAGE_FETCHED),
        JobStatus::Extracted | JobStatus::Validating => Some(topics::EXTRACTION_COMPLETED),
        JobStatus::Completed | JobStatus::Failed => None,
    }
}

/// Stage a topic runs.
pub fn stage_for_topic(topic: &str) -> Option<Stage> {
    match topic {
        topics::EXTRACTION_REQUESTED => Some(Stage::Fetching),
        topics::WEBPAGE_FETCHED => Some(Stage::Extracting),
        topics::EXTRACTION_COMPLETED => Some(Stage::Validating),
        _ => None,
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Failure of one stage delivery.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{}: {source}", failure_prefix(.stage))]
    Capability {
        stage: Stage,
        #[source]
        source: CapabilityError,
    },

    #[error("{}: Request timeout after {} seconds", failure_prefix(.stage), .after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    #[error("{}: storage error: {source}", failure_prefix(.stage))]
    Storage {
        stage: Stage,
        #[source]
        source: StorageError,
    },

    #[error("{reason}")]
    Failed { stage: Stage, reason: String },

    #[error("{}: {source}", failure_prefix(.stage))]
    Transition {
        stage: Stage,
        #[source]
        source: ScrapelineError,
    },

    #[error("invalid stage message: {0}")]
    Message(#[from] RelayError),
}

fn failure_prefix(stage: &Stage) -> &'static str {
    match stage {
        Stage::Fetching => "Scraping failed",
        Stage::Extracting => "Extraction failed",
        Stage::Validating => "Storing failed",
    }
}

impl StageError {
    pub fn failed(stage: Stage, reason: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            reason: reason.into(),
        }
    }

    /// Attribute a tracker error to the stage that hit it.
    pub fn from_pipeline(stage: Stage, err: PipelineError) -> Self {
        match err {
            PipelineError::Storage(source) => Self::Storage { stage, source },
            PipelineError::Core(source) => Self::Transition { stage, source },
            other => Self::failed(stage, other.to_string()),
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Capability { stage, .. }
            | Self::Timeout { stage, .. }
            | Self::Storage { stage, .. }
            | Self::Failed { stage, .. }
            | Self::Transition { stage, .. } => Some(*stage),
            Self::Message(_) => None,
        }
    }
}

impl Retryable for StageError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Capability { source, .. } => source.is_transient(),
            Self::Timeout { .. } | Self::Storage { .. } => true,
            Self::Failed { .. } | Self::Transition { .. } | Self::Message(_) => false,
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────

/// Everything a stage needs: storage, capabilities, the tracker and timings.
#[derive(Clone)]
pub struct StageContext {
    pub storage: StorageEngine,
    pub caps: Capabilities,
    pub tracker: JobTracker,
    pub config: PipelineConfig,
}

impl StageContext {
    /// Fire the scraper's completion webhook for a finished job, if any.
    ///
    /// Delivery runs on its own task and never touches the job.
    pub async fn notify_finished(&self, job: &Job) {
        let Some(notifier) = self.caps.notifier.clone() else {
            return;
        };
        let Some(scraper_id) = job.scraper_id.as_deref() else {
            return;
        };
        let endpoint = match self.storage.scrapers.get(scraper_id).await {
            Ok(Some(scraper)) => match scraper.webhook_url {
                Some(url) => url,
                None => return,
            },
            Ok(None) => return,
            Err(e) => {
                warn!(job_id = %job.id, scraper_id, error = %e, "webhook lookup failed");
                return;
            }
        };

        let payload = serde_json::json!({
            "job": JobStatusView::from(job),
            "result": JobResultView::from(job),
        });
        let job_id = job.id.clone();
        tokio::spawn(async move {
            match notifier.notify(&endpoint, &payload).await {
                Ok(()) => debug!(job_id = %job_id, url = %endpoint, "completion webhook sent"),
                Err(e) => {
                    warn!(job_id = %job_id, url = %endpoint, error = %e, "completion webhook failed")
                }
            }
        });
    }

    /// Drop a finished job's intermediate payloads. Leftovers only cost space.
    pub async fn clear_payloads(&self, job_id: &str) {
        if let Err(e) = self.storage.payloads.clear(job_id).await {
            warn!(job_id, error = %e, "failed to clear stage payloads");
        }
    }
}

/// True when `job` already moved past `stage`, e.g. a duplicate delivery.
fn is_past(job: &Job, stage: Stage) -> bool {
    job.status.ordinal() > stage.running_status().ordinal()
}

/// `null`, `{}` and `[]` count as nothing extracted.
pub(crate) fn is_empty_data(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
