//! Long-running process lifecycle.
//!
//! A [`Worker`] is started once, reports health on a heartbeat while it runs,
//! and is asked to drain when the process receives a termination signal.
//! [`WorkerRunner`] owns that sequence; [`WorkerBuilder`] configures it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::error::RelayError;

// ── Health ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub worker_id: String,
    pub status: WorkerStatus,
    /// Units of work accepted and not yet finished.
    pub in_flight: usize,
}

// ── Worker trait ─────────────────────────────────────────────────────

/// A long-running process driven by [`WorkerRunner`].
#[async_trait]
pub trait Worker: Send + Sync {
    /// Called once when the worker starts. Spawn loops, resume work, etc.
    async fn start(&self) -> Result<(), RelayError>;

    /// Called once during graceful shutdown. Drain in-flight work.
    async fn stop(&self) -> Result<(), RelayError>;

    /// Human-readable name for this worker (used in health reports and logging).
    fn name(&self) -> &str;

    /// Current health, reported on every heartbeat.
    async fn health(&self) -> WorkerHealth {
        WorkerHealth {
            worker_id: self.name().to_string(),
            status: WorkerStatus::Healthy,
            in_flight: 0,
        }
    }
}

// ── WorkerBuilder ────────────────────────────────────────────────────

/// Fluent builder for a [`WorkerRunnerConfig`].
///
/// # Example
/// ```ignore
/// let config = WorkerBuilder::new("scrapeline-worker")
///     .health_interval(Duration::from_secs(10))
///     .shutdown_timeout(Duration::from_secs(30))
///     .build();
/// ```
pub struct WorkerBuilder {
    name: String,
    health_interval: Duration,
    shutdown_timeout: Duration,
}

impl WorkerBuilder {
    /// Create a new builder with the given worker name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            health_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    /// Set the interval between health reports (default: 30s).
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the maximum time to wait for in-flight work during shutdown (default: 5s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn build(self) -> WorkerRunnerConfig {
        WorkerRunnerConfig {
            name: self.name,
            health_interval: self.health_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Configuration produced by [`WorkerBuilder`], consumed by [`WorkerRunner`].
pub struct WorkerRunnerConfig {
    pub name: String,
    pub health_interval: Duration,
    pub shutdown_timeout: Duration,
}

// ── WorkerRunner ─────────────────────────────────────────────────────

/// Drives a [`Worker`] from `start()` to `stop()`.
///
/// Between the two it logs a heartbeat every `health_interval` and waits for
/// SIGINT/SIGTERM or the optional programmatic notify. `stop()` is bounded by
/// `shutdown_timeout`; a final heartbeat records what was left in flight.
pub struct WorkerRunner;

impl WorkerRunner {
    pub async fn run(
        worker: Arc<dyn Worker>,
        config: WorkerRunnerConfig,
        shutdown_notify: Option<Arc<Notify>>,
    ) -> Result<(), RelayError> {
        let name = config.name.as_str();
        info!(worker = %name, "starting worker");
        worker.start().await?;
        info!(worker = %name, health_interval = ?config.health_interval, "worker started");

        let mut heartbeat = tokio::time::interval(config.health_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let shutdown = Self::shutdown_requested(shutdown_notify);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = heartbeat.tick() => {
                    Self::report_health(worker.as_ref()).await;
                }
            }
        }

        info!(worker = %name, timeout = ?config.shutdown_timeout, "shutdown requested, draining");
        match tokio::time::timeout(config.shutdown_timeout, worker.stop()).await {
            Ok(Ok(())) => info!(worker = %name, "worker drained"),
            Ok(Err(e)) => warn!(worker = %name, error = %e, "worker stop failed"),
            Err(_) => warn!(worker = %name, "drain timed out, abandoning in-flight work"),
        }

        let last = worker.health().await;
        info!(worker = %name, in_flight = last.in_flight, "worker exited");
        Ok(())
    }

    pub(crate) async fn report_health(worker: &dyn Worker) -> WorkerHealth {
        let health = worker.health().await;
        if health.status == WorkerStatus::Healthy {
            info!(worker = %health.worker_id, in_flight = health.in_flight, "heartbeat");
        } else {
            warn!(
                worker = %health.worker_id,
                status = ?health.status,
                in_flight = health.in_flight,
                "heartbeat: worker not healthy"
            );
        }
        health
    }

    async fn shutdown_requested(external: Option<Arc<Notify>>) {
        let Some(notify) = external else {
            return termination_signal().await;
        };
        tokio::select! {
            _ = termination_signal() => {}
            _ = notify.notified() => {}
        }
    }
}

/// SIGINT or SIGTERM on Unix, Ctrl+C elsewhere. Never resolves if no handler
/// can be installed.
async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let interrupt = signal(SignalKind::interrupt());
        let terminate = signal(SignalKind::terminate());
        match (interrupt, terminate) {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => info!("received SIGINT"),
                    _ = terminate.recv() => info!("received SIGTERM"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "unix signal handlers unavailable, using ctrl_c");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl_c"),
        Err(e) => {
            warn!(error = %e, "cannot listen for ctrl_c");
            std::future::pending::<()>().await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::lanes::{LaneDispatcher, RetryPolicy};
    use crate::message::Message;
    use crate::traits::{MessageHandler, Retryable};

    #[derive(Debug, thiserror::Error)]
    #[error("never")]
    struct Never;

    impl Retryable for Never {
        fn is_transient(&self) -> bool {
            false
        }
    }

    /// Handler that takes a while per message.
    #[derive(Default)]
    struct Slow {
        handled: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for Slow {
        type Error = Never;

        async fn handle(&self, _message: Message) -> Result<Option<Message>, Never> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn dead_letter(&self, _message: Message, _error: Never) {}
    }

    /// Lane-backed worker: stop closes the lanes and drains them.
    struct LaneWorker {
        lanes: LaneDispatcher<Arc<Slow>>,
        health_checks: AtomicU32,
    }

    #[async_trait]
    impl Worker for LaneWorker {
        async fn start(&self) -> Result<(), RelayError> {
            for i in 0..4 {
                let message = Message::new("scrapeline.test", format!("job_{}", i % 2), &i)?;
                self.lanes.dispatch(message)?;
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), RelayError> {
            self.lanes.close();
            self.lanes.wait_idle().await;
            Ok(())
        }

        fn name(&self) -> &str {
            "lane-worker"
        }

        async fn health(&self) -> WorkerHealth {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
            WorkerHealth {
                worker_id: self.name().to_string(),
                status: if self.lanes.is_closed() {
                    WorkerStatus::Degraded
                } else {
                    WorkerStatus::Healthy
                },
                in_flight: self.lanes.pending(),
            }
        }
    }

    fn lane_worker() -> Arc<LaneWorker> {
        Arc::new(LaneWorker {
            lanes: LaneDispatcher::new(
                Arc::new(Slow::default()),
                RetryPolicy::new(1, Duration::from_millis(1)),
            ),
            health_checks: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    async fn stop_drains_accepted_work() {
        let worker = lane_worker();
        let shutdown = Arc::new(Notify::new());
        let config = WorkerBuilder::new("lane-worker")
            .health_interval(Duration::from_millis(10))
            .shutdown_timeout(Duration::from_secs(2))
            .build();

        let w = worker.clone();
        let s = shutdown.clone();
        let handle = tokio::spawn(async move { WorkerRunner::run(w, config, Some(s)).await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        shutdown.notify_one();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner should finish")
            .expect("runner task should not panic");
        assert!(result.is_ok());
        assert!(worker.lanes.is_closed());
        assert_eq!(worker.lanes.pending(), 0);
        assert_eq!(worker.lanes.handler().handled.load(Ordering::SeqCst), 4);
        assert!(worker.health_checks.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn health_reports_pending_lane_work() {
        let worker = lane_worker();
        worker.start().await.unwrap();

        let health = WorkerRunner::report_health(worker.as_ref()).await;
        assert_eq!(health.worker_id, "lane-worker");
        assert_eq!(health.status, WorkerStatus::Healthy);
        assert_eq!(health.in_flight, 4);

        worker.stop().await.unwrap();
        let health = WorkerRunner::report_health(worker.as_ref()).await;
        assert_eq!(health.status, WorkerStatus::Degraded);
        assert_eq!(health.in_flight, 0);
    }

    #[test]
    fn builder_defaults() {
        let config = WorkerBuilder::new("scrapeline-worker").build();
        assert_eq!(config.name, "scrapeline-worker");
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }
}
