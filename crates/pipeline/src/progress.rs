//! Live job progress: every state transition fans out to subscribers keyed by job id.
//!
//! Publishing is best-effort. Each job has a bounded channel, so a slow
//! subscriber skips intermediate updates instead of holding up a stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::debug;

use scrapeline_core::{CacheType, Job, JobStatus, Stage};
use scrapeline_relay::KeyedBroadcast;

/// Buffered updates per job before slow subscribers start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    pub message: Option<String>,
    pub error: Option<String>,
    pub stage: Option<Stage>,
    pub cached: bool,
    pub cache_type: Option<CacheType>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            percent: job.percent,
            message: job.message.clone(),
            error: job.error.clone(),
            stage: job.stage,
            cached: job.cached,
            cache_type: job.cache_type,
            timestamp: job.updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

pub struct ProgressPublisher {
    hub: KeyedBroadcast<ProgressUpdate>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: KeyedBroadcast::new(capacity),
        }
    }

    /// Broadcast the job's current state. A terminal update closes the job's channel.
    pub fn publish(&self, job: &Job) -> usize {
        let update = ProgressUpdate::from_job(job);
        let delivered = self.hub.publish(&job.id, update);
        debug!(job_id = %job.id, status = %job.status, percent = job.percent, delivered, "progress published");
        if job.is_terminal() {
            self.hub.close(&job.id);
        }
        delivered
    }

    /// Receiver for updates published from now on. Pair with a snapshot read
    /// *after* this call so no transition is lost in between.
    pub fn listen(&self, job_id: &str) -> Receiver<ProgressUpdate> {
        self.hub.subscribe(job_id)
    }

    /// Build a subscription from a receiver obtained with [`listen`](Self::listen)
    /// and the job state read afterwards.
    pub fn attach(&self, rx: Receiver<ProgressUpdate>, snapshot: &Job) -> ProgressSubscription {
        if snapshot.is_terminal() {
            // Nothing else will be published for this job.
            self.hub.close(&snapshot.id);
        }
        ProgressSubscription::new(ProgressUpdate::from_job(snapshot), rx)
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.hub.subscriber_count(job_id)
    }

    pub fn open_channels(&self) -> usize {
        self.hub.open_channels()
    }
}

impl Default for ProgressPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Snapshot followed by live updates, ending after the terminal update.
///
/// Updates that do not move the job forward (already covered by the snapshot
/// or a later update) are skipped, so consumers observe a monotonic sequence.
pub struct ProgressSubscription {
    snapshot: Option<ProgressUpdate>,
    rx: Receiver<ProgressUpdate>,
    last: Option<JobStatus>,
    finished: bool,
}

impl ProgressSubscription {
    fn new(snapshot: ProgressUpdate, rx: Receiver<ProgressUpdate>) -> Self {
        Self {
            snapshot: Some(snapshot),
            rx,
            last: None,
            finished: false,
        }
    }

    /// Next update, or `None` once the job reached a terminal state.
    pub async fn next(&mut self) -> Option<ProgressUpdate> {
        if self.finished {
            return None;
        }
        if let Some(snapshot) = self.snapshot.take() {
            return Some(self.emit(snapshot));
        }

        loop {
            match self.rx.recv().await {
                Ok(update) => {
                    if self.is_behind(&update) {
                        continue;
                    }
                    return Some(self.emit(update));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Drain until the terminal update and return it.
    pub async fn wait_terminal(&mut self) -> Option<ProgressUpdate> {
        let mut last = None;
        while let Some(update) = self.next().await {
            last = Some(update);
        }
        last.filter(ProgressUpdate::is_terminal)
    }

    fn is_behind(&self, update: &ProgressUpdate) -> bool {
        self.last
            .is_some_and(|last| update.status.ordinal() <= last.ordinal())
    }

    fn emit(&mut self, update: ProgressUpdate) -> ProgressUpdate {
        self.last = Some(update.status);
        if update.is_terminal() {
            self.finished = true;
        }
        update
    }
}
