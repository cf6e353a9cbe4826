use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;
use crate::kv::{get_json, put_json, Namespace, SharedKv};

/// Intermediate output handed from one stage to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Normalized page text produced by the fetch stage.
    Fetch,
    /// Raw extractor output produced by the extract stage.
    Extract,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 2] = [Self::Fetch, Self::Extract];

    const fn suffix(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
        }
    }
}

fn payload_key(job_id: &str, kind: PayloadKind) -> String {
    format!("{}.{}", job_id, kind.suffix())
}

/// Durable stage payloads, so stage messages only need to carry the job id.
#[derive(Clone)]
pub struct PayloadStore {
    kv: SharedKv,
}

impl PayloadStore {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv }
    }

    pub async fn put<T: Serialize + Sync>(
        &self,
        job_id: &str,
        kind: PayloadKind,
        payload: &T,
    ) -> Result<(), StorageError> {
        put_json(self.kv.as_ref(), Namespace::StagePayloads, &payload_key(job_id, kind), payload).await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        job_id: &str,
        kind: PayloadKind,
    ) -> Result<Option<T>, StorageError> {
        get_json(self.kv.as_ref(), Namespace::StagePayloads, &payload_key(job_id, kind)).await
    }

    /// Drop every payload of a finished job.
    pub async fn clear(&self, job_id: &str) -> Result<(), StorageError> {
        for kind in PayloadKind::ALL {
            self.kv
                .delete(Namespace::StagePayloads, &payload_key(job_id, kind))
                .await?;
        }
        Ok(())
    }
}
