//! Fetch stage: extraction-cache short circuit, then content cache or the
//! content source, normalized to text.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};

use scrapeline_core::{CacheType, Job, JobResult, JobStatus, Stage};
use scrapeline_relay::topics;
use scrapeline_storage::{ContentEntry, ExtractionEntry, PayloadKind};

use super::{is_past, FetchPayload, StageContext, StageError, StageOutcome};

const STAGE: Stage = Stage::Fetching;

pub async fn run(ctx: &StageContext, mut job: Job, attempt: u32) -> Result<StageOutcome, StageError> {
    if is_past(&job, STAGE) {
        debug!(job_id = %job.id, status = %job.status, "fetch already done, skipping");
        return Ok(StageOutcome::Finished);
    }

    if job.options.use_cache {
        if let Some(hit) = ctx.storage.cache.get_extraction(&job.url, &job.schema).await {
            complete_from_cache(ctx, &mut job, hit).await?;
            return Ok(StageOutcome::Finished);
        }
    }

    ctx.tracker
        .enter(&mut job, STAGE, attempt, "Fetching webpage...")
        .await
        .map_err(|e| StageError::from_pipeline(STAGE, e))?;

    let cached = if job.options.use_cache {
        ctx.storage.cache.get_content(&job.url).await
    } else {
        None
    };

    let entry = match cached {
        Some(entry) => {
            job.mark_cached(CacheType::Content);
            info!(job_id = %job.id, url = %job.url, "using cached content");
            entry
        }
        None => {
            let entry = fetch_fresh(ctx, &job).await?;
            ctx.storage.cache.put_content(&entry).await;
            entry
        }
    };

    let payload = FetchPayload {
        text: entry.text,
        metadata: entry.metadata,
        source: entry.source,
        content_digest: entry.digest,
    };
    ctx.storage
        .payloads
        .put(&job.id, PayloadKind::Fetch, &payload)
        .await
        .map_err(|source| StageError::Storage { stage: STAGE, source })?;

    ctx.tracker
        .advance(&mut job, JobStatus::Fetched, "Content fetched, extracting...")
        .await
        .map_err(|e| StageError::from_pipeline(STAGE, e))?;

    Ok(StageOutcome::Next(topics::WEBPAGE_FETCHED))
}

/// Call the content source under the stage timeout and normalize the result.
async fn fetch_fresh(ctx: &StageContext, job: &Job) -> Result<ContentEntry, StageError> {
    let timeout = ctx.config.fetch.timeout();
    let raw = tokio::time::timeout(timeout, ctx.caps.source.fetch(&job.url, &job.options.fetch))
        .await
        .map_err(|_| StageError::Timeout {
            stage: STAGE,
            after: timeout,
        })?
        .map_err(|source| StageError::Capability { stage: STAGE, source })?;

    let text = ctx.caps.normalizer.normalize(&raw);
    if text.trim().is_empty() {
        return Err(StageError::failed(STAGE, "Empty content after conversion"));
    }

    info!(
        job_id = %job.id,
        url = %job.url,
        source = %raw.source,
        chars = text.len(),
        "content fetched"
    );
    Ok(ContentEntry::new(&job.url, text, &raw.source, raw.metadata, Utc::now()))
}

async fn complete_from_cache(
    ctx: &StageContext,
    job: &mut Job,
    hit: ExtractionEntry,
) -> Result<(), StageError> {
    let mut metadata: Map<String, Value> = hit.metadata;
    metadata.insert("cached_at".into(), Value::String(hit.captured_at.to_rfc3339()));

    let result = JobResult {
        data: hit.data,
        model: hit.model,
        usage: hit.usage,
        metadata,
        cached: true,
        completed_at: Utc::now(),
    };
    job.mark_cached(CacheType::Extraction);
    ctx.tracker
        .complete(job, result, "Using cached result")
        .await
        .map_err(|e| StageError::from_pipeline(STAGE, e))?;
    ctx.notify_finished(job).await;
    Ok(())
}
