//! Extract stage: run the structured extractor over the fetched text.

use tracing::{debug, info};

use scrapeline_core::{Job, JobStatus, Stage};
use scrapeline_relay::topics;
use scrapeline_storage::PayloadKind;

use super::{is_empty_data, is_past, ExtractPayload, FetchPayload, StageContext, StageError, StageOutcome};

const STAGE: Stage = Stage::Extracting;

pub async fn run(ctx: &StageContext, mut job: Job, attempt: u32) -> Result<StageOutcome, StageError> {
    if is_past(&job, STAGE) {
        debug!(job_id = %job.id, status = %job.status, "extraction already done, skipping");
        return Ok(StageOutcome::Finished);
    }

    let fetched: FetchPayload = ctx
        .storage
        .payloads
        .get(&job.id, PayloadKind::Fetch)
        .await
        .map_err(|source| StageError::Storage { stage: STAGE, source })?
        .ok_or_else(|| StageError::failed(STAGE, "Fetch payload not found"))?;

    ctx.tracker
        .enter(&mut job, STAGE, attempt, "Extracting data...")
        .await
        .map_err(|e| StageError::from_pipeline(STAGE, e))?;

    let timeout = ctx.config.extract.timeout();
    let extraction = tokio::time::timeout(timeout, ctx.caps.extractor.extract(&fetched.text, &job.schema))
        .await
        .map_err(|_| StageError::Timeout {
            stage: STAGE,
            after: timeout,
        })?
        .map_err(|source| StageError::Capability { stage: STAGE, source })?;

    if is_empty_data(&extraction.data) {
        return Err(StageError::failed(STAGE, "Extraction returned empty data"));
    }

    info!(
        job_id = %job.id,
        model = extraction.model.as_deref().unwrap_or("unknown"),
        total_tokens = extraction.usage.as_ref().and_then(|u| u.total_tokens),
        "data extracted"
    );

    let payload = ExtractPayload {
        data: extraction.data,
        model: extraction.model,
        usage: extraction.usage,
        metadata: fetched.metadata,
        source: fetched.source,
        content_digest: fetched.content_digest,
    };
    ctx.storage
        .payloads
        .put(&job.id, PayloadKind::Extract, &payload)
        .await
        .map_err(|source| StageError::Storage { stage: STAGE, source })?;

    ctx.tracker
        .advance(&mut job, JobStatus::Extracted, "Data extracted")
        .await
        .map_err(|e| StageError::from_pipeline(STAGE, e))?;

    Ok(StageOutcome::Next(topics::EXTRACTION_COMPLETED))
}
