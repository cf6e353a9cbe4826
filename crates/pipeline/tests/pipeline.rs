mod common;

use std::time::Duration;

use serde_json::json;

use common::{
    assert_terminal, fast_config, title_schema, FaultyKv, Harness, ScriptedExtractor, ScriptedSource,
    PAGE,
};
use scrapeline_capabilities::CapabilityError;
use scrapeline_core::{CacheType, ExtractionSchema, JobStatus, ScheduleSpec, Stage};
use scrapeline_pipeline::{JobRequest, JobTarget, RequestOptions};

// ── Cache behaviour ─────────────────────────────────────────────────

#[tokio::test]
async fn second_run_is_served_from_extraction_cache() {
    let h = Harness::example();

    let first = h.run_inline(title_schema(), "https://example.com", false).await;
    assert_terminal(&first, JobStatus::Completed);
    let first_result = first.result.unwrap();
    assert!(!first_result.cached);
    assert_eq!(first_result.data, Some(json!({"title": ["Example Domain"]})));

    let second = h.run_inline(title_schema(), "https://example.com", true).await;
    assert_terminal(&second, JobStatus::Completed);
    let second_result = second.result.unwrap();
    assert!(second_result.cached);
    assert_eq!(
        serde_json::to_vec(&second_result.data).unwrap(),
        serde_json::to_vec(&first_result.data).unwrap()
    );

    let status = h.service.get_job_status(&second.job_id).await.unwrap();
    assert_eq!(status.percent, 100);
    assert_eq!(status.cache_type, Some(CacheType::Extraction));
    assert_eq!(status.message.as_deref(), Some("Using cached result"));
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.extractor.calls(), 1);
}

#[tokio::test]
async fn cached_run_goes_straight_from_queued_to_completed() {
    let h = Harness::example();
    h.run_inline(title_schema(), "https://example.com", false).await;

    let ticket = h
        .service
        .create_job(JobRequest {
            target: JobTarget::Inline(ExtractionSchema::Structured(title_schema())),
            url: "https://example.com".into(),
            options: RequestOptions {
                run_async: true,
                ..Default::default()
            },
        })
        .await
        .unwrap();

    let mut sub = h.service.subscribe(&ticket.job_id).await.unwrap();
    let mut seen = Vec::new();
    let collect = async {
        while let Some(update) = sub.next().await {
            seen.push(update.status);
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect).await.unwrap();

    assert_eq!(seen.last(), Some(&JobStatus::Completed));
    assert!(
        seen.iter().all(|s| matches!(s, JobStatus::Queued | JobStatus::Completed)),
        "cached run passed through a stage: {seen:?}"
    );
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.cache_type, Some(CacheType::Extraction));
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.extractor.calls(), 1);
}

#[tokio::test]
async fn use_cache_false_always_refetches() {
    let h = Harness::example();
    h.run_inline(title_schema(), "https://example.com", false).await;
    let again = h.run_inline(title_schema(), "https://example.com", false).await;

    assert_terminal(&again, JobStatus::Completed);
    assert!(!again.result.unwrap().cached);
    assert_eq!(h.source.calls(), 2);
    assert_eq!(h.extractor.calls(), 2);
}

#[tokio::test]
async fn different_schema_reuses_cached_content() {
    let h = Harness::example();
    h.run_inline(title_schema(), "https://example.com", true).await;

    let other = h
        .run_inline(json!({"heading": "string"}), "https://example.com/", true)
        .await;
    assert_terminal(&other, JobStatus::Completed);

    let status = h.service.get_job_status(&other.job_id).await.unwrap();
    assert!(status.cached);
    assert_eq!(status.cache_type, Some(CacheType::Content));
    assert_eq!(h.source.calls(), 1, "content source must be skipped");
    assert_eq!(h.extractor.calls(), 2, "extraction must be fresh");
}

// ── Progress ────────────────────────────────────────────────────────

#[tokio::test]
async fn percent_never_decreases() {
    let h = Harness::new(
        ScriptedSource::page(PAGE),
        ScriptedExtractor::slow(json!({"title": ["Example Domain"]}), Duration::from_millis(50)),
    );
    let ticket = h
        .service
        .create_job(JobRequest {
            target: JobTarget::Inline(ExtractionSchema::Structured(title_schema())),
            url: "https://example.com".into(),
            options: RequestOptions {
                run_async: true,
                ..Default::default()
            },
        })
        .await
        .unwrap();
    assert_eq!(ticket.status, JobStatus::Queued);
    assert!(ticket.result.is_none());

    let mut sub = h.service.subscribe(&ticket.job_id).await.unwrap();
    let mut seen = Vec::new();
    let collect = async {
        while let Some(update) = sub.next().await {
            seen.push(update);
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect).await.unwrap();

    assert!(seen.windows(2).all(|w| w[0].percent <= w[1].percent), "{seen:?}");
    let last = seen.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert_eq!(last.percent, 100);
}

#[tokio::test]
async fn late_subscriber_receives_terminal_snapshot() {
    let h = Harness::example();
    let ticket = h.run_inline(title_schema(), "https://example.com", false).await;

    let mut sub = h.service.subscribe(&ticket.job_id).await.unwrap();
    let snapshot = sub.next().await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(sub.next().await.is_none());
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_required_field_fails_validation() {
    let h = Harness::new(
        ScriptedSource::page(PAGE),
        ScriptedExtractor::returning(json!({"summary": "An example page"})),
    );
    let schema = json!({
        "type": "object",
        "properties": {"title": {"type": "string"}},
        "required": ["title"]
    });
    let ticket = h.run_inline(schema, "https://example.com", false).await;

    assert_terminal(&ticket, JobStatus::Failed);
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.stage, Some(Stage::Validating));
    assert_eq!(status.percent, 90);
    let error = status.error.unwrap();
    assert!(error.contains("Validation failed"), "{error}");
    assert!(error.contains("title"), "{error}");
    assert_eq!(h.extractor.calls(), 1, "validation errors are never retried");
}

#[tokio::test]
async fn source_timeouts_fail_after_three_attempts() {
    let h = Harness::new(
        ScriptedSource::failing(CapabilityError::Timeout("Request timeout after 30 seconds".into())),
        ScriptedExtractor::returning(json!({"title": ["x"]})),
    );
    let ticket = h.run_inline(title_schema(), "https://example.com", false).await;

    assert_terminal(&ticket, JobStatus::Failed);
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.stage, Some(Stage::Fetching));
    assert_eq!(status.attempts, 3);
    assert_eq!(status.percent, 20);
    assert!(status.error.unwrap().starts_with("Scraping failed: "));
    assert_eq!(h.source.calls(), 3);
    assert_eq!(h.extractor.calls(), 0);
}

#[tokio::test]
async fn slow_store_times_out_after_three_attempts() {
    let kv = FaultyKv::new();
    kv.stall_extract_payloads(Duration::from_secs(3));
    let mut config = fast_config();
    config.store.timeout_secs = 1;
    config.sync_timeout_secs = 20;
    let h = Harness::with_config(
        kv.storage(),
        config,
        ScriptedSource::page(PAGE),
        ScriptedExtractor::returning(json!({"title": ["Example Domain"]})),
    );
    let ticket = h.run_inline(title_schema(), "https://example.com", false).await;

    assert_terminal(&ticket, JobStatus::Failed);
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.stage, Some(Stage::Validating));
    assert_eq!(status.attempts, 3);
    assert_eq!(status.percent, 80);
    assert_eq!(
        status.error.as_deref(),
        Some("Storing failed: Request timeout after 1 seconds")
    );
    assert_eq!(h.extractor.calls(), 1, "only the store stage is redelivered");
}

#[tokio::test]
async fn missing_page_is_not_retried() {
    let h = Harness::new(
        ScriptedSource::failing(CapabilityError::NotFound("https://example.com/gone".into())),
        ScriptedExtractor::returning(json!({"title": ["x"]})),
    );
    let ticket = h.run_inline(title_schema(), "https://example.com/gone", false).await;

    assert_terminal(&ticket, JobStatus::Failed);
    assert_eq!(h.source.calls(), 1);
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.attempts, 1);
}

#[tokio::test]
async fn blank_page_fails_fetch() {
    let h = Harness::new(
        ScriptedSource::page("   "),
        ScriptedExtractor::returning(json!({"title": ["x"]})),
    );
    let ticket = h.run_inline(title_schema(), "https://example.com", false).await;

    assert_terminal(&ticket, JobStatus::Failed);
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.stage, Some(Stage::Fetching));
    assert_eq!(status.error.as_deref(), Some("Empty content after conversion"));
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn empty_extraction_fails_extract_stage() {
    let h = Harness::new(ScriptedSource::page(PAGE), ScriptedExtractor::returning(json!({})));
    let ticket = h.run_inline(title_schema(), "https://example.com", false).await;

    assert_terminal(&ticket, JobStatus::Failed);
    let status = h.service.get_job_status(&ticket.job_id).await.unwrap();
    assert_eq!(status.stage, Some(Stage::Extracting));
    assert_eq!(status.percent, 60);
    assert_eq!(status.error.as_deref(), Some("Extraction returned empty data"));
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test]
async fn closed_dispatcher_refuses_new_work() {
    let h = Harness::example();
    let dispatcher = h.service.dispatcher();
    assert!(!dispatcher.is_closed());

    dispatcher.close();
    assert!(dispatcher.is_closed());
    let rejected = h
        .service
        .create_job(JobRequest {
            target: JobTarget::Inline(ExtractionSchema::Structured(title_schema())),
            url: "https://example.com".into(),
            options: RequestOptions {
                run_async: true,
                ..Default::default()
            },
        })
        .await;
    assert!(rejected.is_err());
    assert_eq!(dispatcher.pending(), 0);
    assert_eq!(h.source.calls(), 0);
}

// ── Input errors ────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = Harness::example();
    assert!(h.service.get_job_status("job_nope").await.unwrap_err().is_not_found());
    assert!(h.service.get_job_result("job_nope").await.unwrap_err().is_not_found());
    assert!(h.service.subscribe("job_nope").await.is_err());
    assert_eq!(h.service.tracker().progress().open_channels(), 0);
}

#[tokio::test]
async fn bad_requests_are_rejected_before_queueing() {
    let h = Harness::example();

    let bad_url = h
        .service
        .create_job(JobRequest {
            target: JobTarget::Inline(ExtractionSchema::Structured(title_schema())),
            url: "ftp://example.com".into(),
            options: RequestOptions::default(),
        })
        .await
        .unwrap_err();
    assert!(bad_url.is_input_error());

    let inline_schedule = h
        .service
        .create_job(JobRequest {
            target: JobTarget::Inline(ExtractionSchema::Structured(title_schema())),
            url: "https://example.com".into(),
            options: RequestOptions {
                schedule: Some(ScheduleSpec::Minutes(30)),
                ..Default::default()
            },
        })
        .await
        .unwrap_err();
    assert!(inline_schedule.is_input_error());

    let unknown_scraper = h
        .service
        .create_job(JobRequest {
            target: JobTarget::Scraper("scr_missing".into()),
            url: "https://example.com".into(),
            options: RequestOptions::default(),
        })
        .await
        .unwrap_err();
    assert!(unknown_scraper.is_not_found());

    assert!(h.service.storage().jobs.list_incomplete().await.unwrap().is_empty());
    assert_eq!(h.source.calls(), 0);
}
