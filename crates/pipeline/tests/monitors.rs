mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;

use common::{FaultyKv, Harness, ScriptedExtractor, ScriptedSource, PAGE};
use scrapeline_core::{
    ExtractionSchema, FetchOptions, JobStatus, JobTrigger, MonitorFilter, ScheduleSpec,
    ScraperDefinition,
};
use scrapeline_pipeline::{JobRequest, JobTarget, MonitorAction, RequestOptions};
use tokio::sync::Notify;

fn definition(schedule: Option<ScheduleSpec>, urls: &[&str]) -> ScraperDefinition {
    ScraperDefinition {
        name: "Example titles".into(),
        description: Some("title of the example page".into()),
        schema: ExtractionSchema::Structured(json!({"title": ["string"]})),
        options: FetchOptions::default(),
        schedule,
        monitor_urls: urls.iter().map(|u| u.to_string()).collect(),
        webhook_url: None,
    }
}

fn scraper_job(scraper_id: &str, options: RequestOptions) -> JobRequest {
    JobRequest {
        target: JobTarget::Scraper(scraper_id.into()),
        url: "https://example.com".into(),
        options,
    }
}

// ── Registration ────────────────────────────────────────────────────

#[tokio::test]
async fn register_scraper_creates_monitors_and_warms_cache() {
    let h = Harness::example();
    let registered = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(30)), &["https://example.com"]))
        .await
        .unwrap();
    assert_eq!(registered.monitor_ids.len(), 1);
    assert_eq!(registered.warmup_job_ids.len(), 1);
    h.settle().await;

    let warmup = h.service.get_job_status(&registered.warmup_job_ids[0]).await.unwrap();
    assert_eq!(warmup.status, JobStatus::Completed);
    assert_eq!(warmup.trigger, JobTrigger::Warmup);

    // The warm cache serves the first caller-triggered run.
    let ticket = h
        .service
        .create_job(scraper_job(
            &registered.scraper.id,
            RequestOptions {
                skip_monitoring: true,
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    assert!(ticket.result.unwrap().cached);
    assert_eq!(h.source.calls(), 1);
}

#[tokio::test]
async fn short_schedule_is_rejected() {
    let h = Harness::example();
    let err = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(1)), &["https://example.com"]))
        .await
        .unwrap_err();
    assert!(err.is_input_error());
    assert!(h.service.list_scrapers().await.unwrap().is_empty());
}

#[tokio::test]
async fn equivalent_monitor_urls_share_one_monitor() {
    let h = Harness::example();
    let registered = h
        .service
        .register_scraper(definition(
            Some(ScheduleSpec::Minutes(30)),
            &["https://example.com", "https://example.com/"],
        ))
        .await
        .unwrap();
    assert_eq!(registered.monitor_ids.len(), 1);
    assert_eq!(registered.warmup_job_ids.len(), 1);
    h.settle().await;

    let stored = h.service.list_monitors(&MonitorFilter::default()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, registered.monitor_ids[0]);
    assert_eq!(h.source.calls(), 1);
}

// ── Scheduler ticks ─────────────────────────────────────────────────

#[tokio::test]
async fn due_monitor_runs_exactly_once_per_tick() {
    let h = Harness::example();
    let registered = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(30)), &["https://example.com"]))
        .await
        .unwrap();
    h.settle().await;
    let scheduler = h.service.scheduler(StdDuration::from_secs(300));

    let early = scheduler.tick(Utc::now()).await.unwrap();
    assert_eq!(early.due, 0);

    let tick_at = Utc::now() + Duration::minutes(31);
    let report = scheduler.tick(tick_at).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.dispatched, 1);

    let again = scheduler.tick(tick_at).await.unwrap();
    assert_eq!(again.due, 0, "a due monitor is picked up by one tick only");

    let monitor = h
        .service
        .storage()
        .monitors
        .get(&registered.monitor_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert!(monitor.next_run > tick_at);
    assert_eq!(monitor.run_count, 1);
    assert_eq!(monitor.last_run, Some(tick_at));

    h.settle().await;
    let job_id = monitor.last_job_id.unwrap();
    let job = h.service.get_job_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.trigger, JobTrigger::Scheduled);
    assert!(!job.cached, "monitor runs bypass the cache");
    assert_eq!(h.source.calls(), 2);
}

#[tokio::test]
async fn deleted_monitor_is_never_picked_up() {
    let h = Harness::example();
    let registered = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(30)), &["https://example.com"]))
        .await
        .unwrap();
    let monitor_id = &registered.monitor_ids[0];

    h.service.delete_monitor(monitor_id).await.unwrap();
    assert!(h
        .service
        .list_monitors(&MonitorFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert!(h.service.delete_monitor(monitor_id).await.unwrap_err().is_not_found());

    let scheduler = h.service.scheduler(StdDuration::from_secs(300));
    let report = scheduler.tick(Utc::now() + Duration::days(1)).await.unwrap();
    assert_eq!(report.due, 0);
}

#[tokio::test]
async fn monitor_of_deleted_scraper_is_deactivated() {
    let h = Harness::example();
    let registered = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(30)), &["https://example.com"]))
        .await
        .unwrap();
    h.settle().await;
    h.service.delete_scraper(&registered.scraper.id).await.unwrap();

    let scheduler = h.service.scheduler(StdDuration::from_secs(300));
    let report = scheduler.tick(Utc::now() + Duration::hours(1)).await.unwrap();
    assert_eq!(report.deactivated, 1);
    assert_eq!(report.dispatched, 0);

    let monitors = h.service.list_monitors(&MonitorFilter::default()).await.unwrap();
    assert_eq!(monitors.len(), 1);
    assert!(!monitors[0].active);
    assert_eq!(h.source.calls(), 1, "only the warmup job fetched");
}

#[tokio::test]
async fn failed_monitor_write_leaves_no_queued_job() {
    let kv = FaultyKv::new();
    let h = Harness::with_storage(
        kv.storage(),
        ScriptedSource::page(PAGE),
        ScriptedExtractor::returning(json!({"title": ["Example Domain"]})),
    );
    let registered = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(30)), &["https://example.com"]))
        .await
        .unwrap();
    h.settle().await;
    let scheduler = h.service.scheduler(StdDuration::from_secs(300));
    let tick_at = Utc::now() + Duration::minutes(31);

    kv.fail_monitor_writes(true);
    let report = scheduler.tick(tick_at).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 0);
    assert!(h.service.storage().jobs.list_incomplete().await.unwrap().is_empty());

    // The monitor is still due and runs once the store recovers.
    kv.fail_monitor_writes(false);
    let retry = scheduler.tick(tick_at).await.unwrap();
    assert_eq!(retry.dispatched, 1);
    h.settle().await;
    let monitor = h
        .service
        .storage()
        .monitors
        .get(&registered.monitor_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monitor.run_count, 1);
    assert_eq!(h.source.calls(), 2);
}

#[tokio::test]
async fn failed_monitor_write_rejects_scraper_job() {
    let kv = FaultyKv::new();
    let h = Harness::with_storage(
        kv.storage(),
        ScriptedSource::page(PAGE),
        ScriptedExtractor::returning(json!({"title": ["Example Domain"]})),
    );
    let scraper = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(60)), &[]))
        .await
        .unwrap()
        .scraper;

    kv.fail_monitor_writes(true);
    let result = h
        .service
        .create_job(scraper_job(&scraper.id, RequestOptions::default()))
        .await;
    assert!(result.is_err());
    assert!(h.service.storage().jobs.list_incomplete().await.unwrap().is_empty());
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test]
async fn scheduler_honours_shutdown_sent_before_it_waits() {
    let h = Harness::example();
    let scheduler = h.service.scheduler(StdDuration::from_secs(300));
    let shutdown = Arc::new(Notify::new());

    // Sent while the loop is busy elsewhere, e.g. inside a tick.
    shutdown.notify_one();
    tokio::time::timeout(StdDuration::from_secs(5), scheduler.run(shutdown))
        .await
        .expect("scheduler should stop on a stored shutdown signal");
}

// ── Auto-monitoring ─────────────────────────────────────────────────

#[tokio::test]
async fn scraper_jobs_register_and_update_monitors() {
    let h = Harness::example();
    let scraper = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(60)), &[]))
        .await
        .unwrap()
        .scraper;

    let first = h
        .service
        .create_job(scraper_job(&scraper.id, RequestOptions::default()))
        .await
        .unwrap();
    let monitoring = first.monitoring.unwrap();
    assert!(monitoring.monitoring);
    assert_eq!(monitoring.action, MonitorAction::Created);

    let second = h
        .service
        .create_job(scraper_job(
            &scraper.id,
            RequestOptions {
                schedule: Some(ScheduleSpec::Expression("0 * * * *".into())),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    let monitoring = second.monitoring.unwrap();
    assert_eq!(monitoring.action, MonitorAction::Updated);

    let monitor = h
        .service
        .storage()
        .monitors
        .get(&monitoring.monitor_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(monitor.run_count, 0, "caller runs do not count as scheduled runs");
    assert_eq!(monitor.last_job_id.as_deref(), Some(second.job_id.as_str()));

    let skipped = h
        .service
        .create_job(scraper_job(
            &scraper.id,
            RequestOptions {
                skip_monitoring: true,
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    assert!(skipped.monitoring.is_none());

    let removed = h
        .service
        .create_job(scraper_job(
            &scraper.id,
            RequestOptions {
                schedule: Some(ScheduleSpec::Expression(String::new())),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    assert_eq!(removed.monitoring.unwrap().action, MonitorAction::Removed);
    assert!(h
        .service
        .list_monitors(&MonitorFilter::for_scraper(&scraper.id))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn list_monitors_filters_by_scraper() {
    let h = Harness::new(
        common::ScriptedSource::page(PAGE),
        common::ScriptedExtractor::returning(json!({"title": ["Example Domain"]})),
    );
    let a = h
        .service
        .register_scraper(definition(Some(ScheduleSpec::Minutes(30)), &["https://example.com/a"]))
        .await
        .unwrap();
    let b = h
        .service
        .register_scraper(definition(
            Some(ScheduleSpec::Minutes(30)),
            &["https://example.com/b", "https://example.com/c"],
        ))
        .await
        .unwrap();
    h.settle().await;

    let all = h.service.list_monitors(&MonitorFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let only_a = h
        .service
        .list_monitors(&MonitorFilter::for_scraper(&a.scraper.id))
        .await
        .unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].url, "https://example.com/a");
    assert_eq!(
        h.service
            .list_monitors(&MonitorFilter::for_scraper(&b.scraper.id))
            .await
            .unwrap()
            .len(),
        2
    );
}
