//! Routes stage messages to the stage functions over per-job lanes.
//!
//! Each job id is a lane key, so one job's stages never overlap while
//! different jobs run in parallel. Transient stage errors are redelivered by
//! the lanes; anything that runs out of attempts lands in
//! [`Pipeline::dead_letter`], which fails the job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use scrapeline_core::{Job, Stage};
use scrapeline_relay::{topics, LaneDispatcher, Message, MessageHandler, RelayError, RetryPolicy};

use crate::error::Result;
use crate::stages::{self, StageContext, StageError, StageOutcome, StageTicket};

// ── Handler ─────────────────────────────────────────────────────────

pub struct Pipeline {
    ctx: StageContext,
}

impl Pipeline {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }
}

#[async_trait]
impl MessageHandler for Pipeline {
    type Error = StageError;

    async fn handle(&self, message: Message) -> std::result::Result<Option<Message>, StageError> {
        let ticket: StageTicket = message.decode().map_err(RelayError::from)?;
        let stage = stages::stage_for_topic(&message.topic).unwrap_or(Stage::Fetching);

        let job = match self.ctx.tracker.find(&ticket.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %ticket.job_id, topic = %message.topic, "stage message for unknown job dropped");
                return Ok(None);
            }
            Err(e) => return Err(StageError::from_pipeline(stage, e)),
        };
        if job.is_terminal() {
            debug!(job_id = %job.id, status = %job.status, "job already finished, dropping message");
            return Ok(None);
        }

        let outcome = match message.topic.as_str() {
            topics::EXTRACTION_REQUESTED => stages::fetch::run(&self.ctx, job, message.attempt).await?,
            topics::WEBPAGE_FETCHED => stages::extract::run(&self.ctx, job, message.attempt).await?,
            topics::EXTRACTION_COMPLETED => stages::store::run(&self.ctx, job, message.attempt).await?,
            other => {
                warn!(topic = other, key = %message.key, "no stage for topic");
                return Ok(None);
            }
        };

        match outcome {
            StageOutcome::Next(topic) => Ok(Some(
                message.follow_up(topic, &ticket).map_err(RelayError::from)?,
            )),
            StageOutcome::Finished => Ok(None),
        }
    }

    async fn dead_letter(&self, message: Message, error: StageError) {
        let job_id = message.key.clone();
        let stage = error
            .stage()
            .or_else(|| stages::stage_for_topic(&message.topic))
            .unwrap_or(Stage::Fetching);

        let mut job = match self.ctx.tracker.find(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, error = %error, "dead letter for unknown job");
                return;
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to load job for dead letter");
                return;
            }
        };

        // Runs out of attempts keep the attempt count of the last delivery.
        job.attempts = job.attempts.max(message.attempt);
        match self.ctx.tracker.fail(&mut job, stage, &error.to_string()).await {
            Ok(true) => {
                self.ctx.clear_payloads(&job.id).await;
                self.ctx.notify_finished(&job).await;
            }
            Ok(false) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to record job failure"),
        }
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Entry point for starting or resuming jobs on the stage lanes.
#[derive(Clone)]
pub struct JobDispatcher {
    lanes: LaneDispatcher<Arc<Pipeline>>,
}

impl JobDispatcher {
    pub fn new(ctx: StageContext) -> Self {
        let config = &ctx.config;
        let policy = RetryPolicy::new(config.max_attempts, config.fetch.backoff())
            .with_topic_backoff(topics::EXTRACTION_REQUESTED, config.fetch.backoff())
            .with_topic_backoff(topics::WEBPAGE_FETCHED, config.extract.backoff())
            .with_topic_backoff(topics::EXTRACTION_COMPLETED, config.store.backoff());
        Self {
            lanes: LaneDispatcher::new(Arc::new(Pipeline::new(ctx)), policy),
        }
    }

    pub fn context(&self) -> &StageContext {
        self.lanes.handler().context()
    }

    /// Queue the stage a job needs next. Finished jobs are ignored.
    pub fn submit(&self, job: &Job) -> Result<()> {
        let Some(topic) = stages::topic_for_status(job.status) else {
            debug!(job_id = %job.id, status = %job.status, "not submitting finished job");
            return Ok(());
        };
        let ticket = StageTicket {
            job_id: job.id.clone(),
        };
        let message = Message::new(topic, job.id.clone(), &ticket).map_err(RelayError::from)?;
        self.lanes.dispatch(message)?;
        debug!(job_id = %job.id, topic, "job submitted");
        Ok(())
    }

    /// Stage deliveries accepted and not yet finished.
    pub fn pending(&self) -> usize {
        self.lanes.pending()
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.active_lanes()
    }

    /// Stop accepting jobs. Work already queued still runs.
    pub fn close(&self) {
        self.lanes.close();
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.is_closed()
    }

    pub async fn wait_idle(&self) {
        self.lanes.wait_idle().await;
    }
}
