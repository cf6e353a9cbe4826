//! Scripted capabilities and service wiring shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use scrapeline_capabilities::{
    Capabilities, CapabilityError, ContentKind, ContentSource, Extraction, HtmlNormalizer,
    JsonSchemaValidator, RawContent, StructuredExtractor,
};
use scrapeline_core::config::{CacheConfig, PipelineConfig, StageTiming};
use scrapeline_core::{ExtractionSchema, FetchOptions, JobStatus, Usage};
use scrapeline_pipeline::{ExtractionService, JobRequest, JobTarget, JobTicket, RequestOptions};
use scrapeline_storage::{KeyValueStore, MemoryKvStore, Namespace, StorageEngine, StorageError};

pub const PAGE: &str = r#"<html><head><title>Example Domain</title></head>
<body><main><h1>Example Domain</h1><p>This domain is for use in examples.</p></main></body></html>"#;

// ── Content source ──────────────────────────────────────────────────

pub enum SourceScript {
    Page(String),
    Fail(CapabilityError),
}

pub struct ScriptedSource {
    script: SourceScript,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn page(html: &str) -> Arc<Self> {
        Arc::new(Self {
            script: SourceScript::Page(html.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: CapabilityError) -> Arc<Self> {
        Arc::new(Self {
            script: SourceScript::Fail(error),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, _url: &str, _options: &FetchOptions) -> Result<RawContent, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            SourceScript::Page(html) => Ok(RawContent::new(html.clone(), ContentKind::Html, "scripted")),
            SourceScript::Fail(err) => Err(err.clone()),
        }
    }
}

// ── Extractor ───────────────────────────────────────────────────────

pub struct ScriptedExtractor {
    data: Value,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn returning(data: Value) -> Arc<Self> {
        Self::slow(data, Duration::ZERO)
    }

    pub fn slow(data: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            data,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StructuredExtractor for ScriptedExtractor {
    async fn extract(&self, text: &str, _schema: &ExtractionSchema) -> Result<Extraction, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!text.trim().is_empty(), "extractor must receive normalized text");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(Extraction {
            data: self.data.clone(),
            model: Some("scripted-model".into()),
            usage: Some(Usage {
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
                total_tokens: Some(15),
            }),
        })
    }
}

// ── Storage ─────────────────────────────────────────────────────────

/// In-memory store with switchable faults.
#[derive(Default)]
pub struct FaultyKv {
    inner: MemoryKvStore,
    fail_monitor_writes: AtomicBool,
    extract_payload_delay_ms: AtomicU64,
}

impl FaultyKv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_monitor_writes(&self, fail: bool) {
        self.fail_monitor_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every read of an extract payload.
    pub fn stall_extract_payloads(&self, delay: Duration) {
        self.extract_payload_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn storage(self: &Arc<Self>) -> StorageEngine {
        StorageEngine::with_kv(self.clone(), &CacheConfig::default())
    }
}

#[async_trait]
impl KeyValueStore for FaultyKv {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let delay = self.extract_payload_delay_ms.load(Ordering::SeqCst);
        if ns == Namespace::StagePayloads && key.ends_with(".extract") && delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.get(ns, key).await
    }

    async fn put(&self, ns: Namespace, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if ns == Namespace::Monitors && self.fail_monitor_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Other("monitors unavailable".into()));
        }
        self.inner.put(ns, key, value).await
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(ns, key).await
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.inner.list(ns).await
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

/// Three attempts, no backoff, short sync timeout.
pub fn fast_config() -> PipelineConfig {
    let timing = StageTiming {
        timeout_secs: 5,
        backoff_secs: 0,
    };
    PipelineConfig {
        max_attempts: 3,
        fetch: timing,
        extract: timing,
        store: timing,
        sync_timeout_secs: 10,
    }
}

pub struct Harness {
    pub service: ExtractionService,
    pub source: Arc<ScriptedSource>,
    pub extractor: Arc<ScriptedExtractor>,
}

impl Harness {
    pub fn new(source: Arc<ScriptedSource>, extractor: Arc<ScriptedExtractor>) -> Self {
        Self::with_storage(StorageEngine::in_memory(), source, extractor)
    }

    pub fn with_storage(
        storage: StorageEngine,
        source: Arc<ScriptedSource>,
        extractor: Arc<ScriptedExtractor>,
    ) -> Self {
        Self::with_config(storage, fast_config(), source, extractor)
    }

    pub fn with_config(
        storage: StorageEngine,
        config: PipelineConfig,
        source: Arc<ScriptedSource>,
        extractor: Arc<ScriptedExtractor>,
    ) -> Self {
        let caps = Capabilities {
            source: source.clone(),
            normalizer: Arc::new(HtmlNormalizer::new()),
            extractor: extractor.clone(),
            validator: Arc::new(JsonSchemaValidator::new()),
            notifier: None,
        };
        Self {
            service: ExtractionService::new(storage, caps, config),
            source,
            extractor,
        }
    }

    /// Default harness: the example page and a title extractor.
    pub fn example() -> Self {
        Self::new(
            ScriptedSource::page(PAGE),
            ScriptedExtractor::returning(json!({"title": ["Example Domain"]})),
        )
    }

    pub async fn run_inline(&self, schema: Value, url: &str, use_cache: bool) -> JobTicket {
        self.service
            .create_job(JobRequest {
                target: JobTarget::Inline(ExtractionSchema::Structured(schema)),
                url: url.into(),
                options: RequestOptions {
                    use_cache,
                    ..Default::default()
                },
            })
            .await
            .expect("create_job")
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.service.dispatcher().wait_idle())
            .await
            .expect("pipeline should go idle");
    }
}

pub fn title_schema() -> Value {
    json!({"title": ["string"]})
}

pub fn assert_terminal(ticket: &JobTicket, status: JobStatus) {
    let result = ticket.result.as_ref().expect("sync result");
    assert_eq!(result.status, status, "ticket: {ticket:?}");
}
