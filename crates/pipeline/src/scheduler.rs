//! Periodic monitor scheduler.
//!
//! Every tick loads the active monitors whose `next_run` has passed and
//! starts one fresh job per monitor. Ticks run sequentially from a single
//! loop, so they never overlap and a due monitor is picked up exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use scrapeline_core::{Job, JobOptions, JobTrigger, Monitor};
use scrapeline_storage::StorageEngine;

use crate::dispatcher::JobDispatcher;
use crate::error::Result;
use crate::lifecycle::JobTracker;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub dispatched: usize,
    /// Monitors whose scraper no longer exists.
    pub deactivated: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct MonitorScheduler {
    storage: StorageEngine,
    tracker: JobTracker,
    dispatcher: JobDispatcher,
    interval: Duration,
}

impl MonitorScheduler {
    pub fn new(
        storage: StorageEngine,
        tracker: JobTracker,
        dispatcher: JobDispatcher,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            tracker,
            dispatcher,
            interval,
        }
    }

    /// Run every due monitor once. A failing monitor never stops the others.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.storage.monitors.due(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        for monitor in due {
            let monitor_id = monitor.id.clone();
            match self.run_monitor(monitor, now).await {
                Ok(true) => report.dispatched += 1,
                Ok(false) => report.deactivated += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(monitor_id = %monitor_id, error = %e, "scheduler: monitor run failed");
                }
            }
        }

        if report.due > 0 {
            info!(
                due = report.due,
                dispatched = report.dispatched,
                deactivated = report.deactivated,
                failed = report.failed,
                "scheduler tick finished"
            );
        }
        Ok(report)
    }

    /// Returns `false` when the monitor was deactivated instead of run.
    async fn run_monitor(&self, mut monitor: Monitor, now: DateTime<Utc>) -> Result<bool> {
        let Some(scraper) = self.storage.scrapers.get(&monitor.scraper_id).await? else {
            monitor.deactivate(now);
            self.storage.monitors.save(&monitor).await?;
            warn!(
                monitor_id = %monitor.id,
                scraper_id = %monitor.scraper_id,
                "scheduler: scraper deleted, monitor deactivated"
            );
            return Ok(false);
        };

        let job = Job::new(
            monitor.url.clone(),
            scraper.schema.clone(),
            Some(scraper.id.clone()),
            JobOptions {
                use_cache: false,
                fetch: scraper.options.clone(),
            },
            JobTrigger::Scheduled,
            now,
        );
        // The monitor is advanced before the job exists: a failed monitor write
        // leaves nothing queued, and a crash after it cannot double-run the tick.
        monitor.record_run(&job.id, now)?;
        self.storage.monitors.save(&monitor).await?;
        self.tracker.create(&job).await?;
        self.dispatcher.submit(&job)?;

        info!(
            monitor_id = %monitor.id,
            job_id = %job.id,
            url = %monitor.url,
            trigger = "scheduled",
            next_run = %monitor.next_run,
            "scheduler: monitor job dispatched"
        );
        Ok(true)
    }

    /// Tick on the configured interval until `shutdown` fires.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        info!(interval_secs = self.interval.as_secs(), "monitor scheduler started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        warn!(error = %e, "scheduler: failed to load due monitors");
                    }
                }
                _ = shutdown.notified() => {
                    info!("monitor scheduler shutting down");
                    break;
                }
            }
        }
    }
}
