use scrapeline_core::Job;

use crate::error::StorageError;
use crate::kv::{get_json, list_json, put_json, Namespace, SharedKv};

/// Durable job records keyed by job id.
#[derive(Clone)]
pub struct JobStore {
    kv: SharedKv,
}

impl JobStore {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        get_json(self.kv.as_ref(), Namespace::Jobs, job_id).await
    }

    /// Replace the whole record.
    pub async fn save(&self, job: &Job) -> Result<(), StorageError> {
        put_json(self.kv.as_ref(), Namespace::Jobs, &job.id, job).await
    }

    /// Non-terminal jobs, oldest first.
    pub async fn list_incomplete(&self) -> Result<Vec<Job>, StorageError> {
        let mut jobs: Vec<Job> = list_json(self.kv.as_ref(), Namespace::Jobs).await?;
        jobs.retain(|j| !j.is_terminal());
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(jobs)
    }
}
