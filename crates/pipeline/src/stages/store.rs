//! Store stage: validate the extracted data, cache it and complete the job.

use std::future::Future;

use chrono::Utc;
use tracing::{debug, warn};

use scrapeline_core::{Job, JobResult, Stage};
use scrapeline_storage::{ExtractionEntry, PayloadKind};

use super::{is_past, ExtractPayload, StageContext, StageError, StageOutcome};

const STAGE: Stage = Stage::Validating;

pub async fn run(ctx: &StageContext, mut job: Job, attempt: u32) -> Result<StageOutcome, StageError> {
    if is_past(&job, STAGE) {
        debug!(job_id = %job.id, status = %job.status, "job already stored, skipping");
        return Ok(StageOutcome::Finished);
    }

    let extracted: ExtractPayload = within_timeout(ctx, async {
        ctx.storage
            .payloads
            .get(&job.id, PayloadKind::Extract)
            .await
            .map_err(|source| StageError::Storage { stage: STAGE, source })
    })
    .await?
    .ok_or_else(|| StageError::failed(STAGE, "Extraction payload not found"))?;

    ctx.tracker
        .enter(&mut job, STAGE, attempt, "Validating results...")
        .await
        .map_err(|e| StageError::from_pipeline(STAGE, e))?;

    let report = ctx.caps.validator.validate(&extracted.data, &job.schema);
    if !report.valid {
        warn!(job_id = %job.id, errors = ?report.errors, "extracted data failed validation");
        return Err(StageError::failed(STAGE, report.to_string()));
    }

    let now = Utc::now();
    let mut metadata = extracted.metadata;
    metadata.insert("source".into(), extracted.source.into());

    // Monitor runs skip cache reads but still refresh the entry.
    let entry = ExtractionEntry {
        url: job.url.clone(),
        data: extracted.data.clone(),
        model: extracted.model.clone(),
        usage: extracted.usage.clone(),
        metadata: metadata.clone(),
        scraper_id: job.scraper_id.clone(),
        content_digest: Some(extracted.content_digest),
        captured_at: now,
    };
    within_timeout(ctx, async {
        ctx.storage.cache.put_extraction(&job.schema, &entry).await;
        Ok::<_, StageError>(())
    })
    .await?;

    let result = JobResult {
        data: extracted.data,
        model: extracted.model,
        usage: extracted.usage,
        metadata,
        cached: job.cached,
        completed_at: now,
    };
    within_timeout(ctx, async {
        ctx.tracker
            .complete(&mut job, result, "Extraction completed")
            .await
            .map_err(|e| StageError::from_pipeline(STAGE, e))
    })
    .await?;

    ctx.clear_payloads(&job.id).await;
    ctx.notify_finished(&job).await;
    Ok(StageOutcome::Finished)
}

/// Storage work of this stage, bounded by the store timeout.
async fn within_timeout<T>(
    ctx: &StageContext,
    work: impl Future<Output = Result<T, StageError>>,
) -> Result<T, StageError> {
    let after = ctx.config.store.timeout();
    tokio::time::timeout(after, work)
        .await
        .map_err(|_| StageError::Timeout { stage: STAGE, after })?
}
