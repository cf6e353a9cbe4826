//! scrapeline-worker: runs the extraction pipeline and the monitor scheduler.
//!
//! `serve` resumes unfinished jobs, then processes stage lanes and ticks the
//! monitor scheduler until SIGINT/SIGTERM. `extract` runs a single job
//! against the configured storage and prints its result as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing::{info, warn};

use scrapeline_core::{Config, ExtractionSchema};
use scrapeline_pipeline::{
    ExtractionService, JobRequest, JobTarget, MonitorScheduler, RequestOptions,
};
use scrapeline_relay::{
    RelayError, Worker, WorkerBuilder, WorkerHealth, WorkerRunner, WorkerStatus,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Scrapeline worker: url + schema to structured JSON.
#[derive(Parser, Debug)]
#[command(name = "scrapeline-worker", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process jobs and run due monitors until shut down.
    Serve {
        /// Health report interval in seconds.
        #[arg(long, env = "WORKER_HEALTH_INTERVAL", default_value_t = 30)]
        health_interval: u64,

        /// Time allowed for in-flight stages on shutdown, in seconds.
        #[arg(long, env = "WORKER_SHUTDOWN_TIMEOUT", default_value_t = 30)]
        shutdown_timeout: u64,
    },

    /// Run one extraction and print the result.
    Extract {
        /// Page to extract from.
        #[arg(long)]
        url: String,

        /// Saved scraper to use.
        #[arg(long, conflicts_with = "schema")]
        scraper: Option<String>,

        /// Inline schema: a JSON object, or a plain-language prompt.
        #[arg(long, required_unless_present = "scraper")]
        schema: Option<String>,

        /// Ignore cached content and results.
        #[arg(long)]
        no_cache: bool,
    },
}

// ── ExtractionWorker ────────────────────────────────────────────────

struct ExtractionWorker {
    service: ExtractionService,
    scheduler: Option<MonitorScheduler>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl Worker for ExtractionWorker {
    async fn start(&self) -> Result<(), RelayError> {
        let resumed = self
            .service
            .resume_incomplete()
            .await
            .map_err(|e| RelayError::Worker(format!("resume failed: {e}")))?;
        info!(resumed, "pending jobs resumed");

        match &self.scheduler {
            Some(scheduler) => {
                let scheduler = scheduler.clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move { scheduler.run(shutdown).await });
            }
            None => info!("monitor scheduler disabled"),
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), RelayError> {
        // Stored as a permit if the scheduler is mid-tick.
        self.shutdown.notify_one();
        let dispatcher = self.service.dispatcher();
        dispatcher.close();
        info!(pending = dispatcher.pending(), "draining stage lanes");
        dispatcher.wait_idle().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "scrapeline-worker"
    }

    async fn health(&self) -> WorkerHealth {
        let dispatcher = self.service.dispatcher();
        WorkerHealth {
            worker_id: self.name().to_string(),
            status: if dispatcher.is_closed() {
                WorkerStatus::Degraded
            } else {
                WorkerStatus::Healthy
            },
            in_flight: dispatcher.pending(),
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    scrapeline_core::config::load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_summary();

    let service = ExtractionService::from_config(&config).context("failed to build service")?;

    match cli.command {
        Command::Serve {
            health_interval,
            shutdown_timeout,
        } => {
            let scheduler = config
                .scheduler
                .enabled
                .then(|| service.scheduler(config.scheduler.tick_interval()));
            let worker = Arc::new(ExtractionWorker {
                service,
                scheduler,
                shutdown: Arc::new(Notify::new()),
            });
            let runner_config = WorkerBuilder::new("scrapeline-worker")
                .health_interval(Duration::from_secs(health_interval))
                .shutdown_timeout(Duration::from_secs(shutdown_timeout))
                .build();
            WorkerRunner::run(worker, runner_config, None).await?;
        }
        Command::Extract {
            url,
            scraper,
            schema,
            no_cache,
        } => {
            let target = match (scraper, schema) {
                (Some(id), _) => JobTarget::Scraper(id),
                (None, Some(raw)) => JobTarget::Inline(parse_schema(&raw)),
                (None, None) => anyhow::bail!("either --scraper or --schema is required"),
            };
            let ticket = service
                .create_job(JobRequest {
                    target,
                    url,
                    options: RequestOptions {
                        use_cache: !no_cache,
                        skip_monitoring: true,
                        ..Default::default()
                    },
                })
                .await?;

            match ticket.result {
                Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                None => {
                    warn!(job_id = %ticket.job_id, "job did not finish within the sync timeout");
                    let status = service.get_job_status(&ticket.job_id).await?;
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
            }
        }
    }

    Ok(())
}

/// A JSON object is a structural schema, anything else a prompt.
fn parse_schema(raw: &str) -> ExtractionSchema {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => ExtractionSchema::Structured(value),
        _ => ExtractionSchema::Prompt(raw.to_string()),
    }
}
