use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScrapelineError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub pipeline: PipelineConfig,
    pub scheduler: SchedulerConfig,
    pub content: ContentSourceConfig,
    pub extractor: ExtractorConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SCRAPELINE_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SCRAPELINE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            cache: CacheConfig::from_env_profiled(p),
            pipeline: PipelineConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            content: ContentSourceConfig::from_env_profiled(p),
            extractor: ExtractorConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     backend={}, data_dir={}", self.storage.backend, self.storage.data_dir.display());
        tracing::info!("  cache:       staleness={}, hot_capacity={}", self.cache.staleness, self.cache.hot_capacity);
        tracing::info!("  pipeline:    max_attempts={}, sync_timeout={}s", self.pipeline.max_attempts, self.pipeline.sync_timeout_secs);
        tracing::info!("  scheduler:   enabled={}, tick={}s", self.scheduler.enabled, self.scheduler.tick_secs);
        tracing::info!("  content:     firecrawl={}", if self.content.is_firecrawl_configured() { "configured" } else { "(none)" });
        tracing::info!("  extractor:   model={}, configured={}", self.extractor.model, self.extractor.is_configured());
        tracing::info!("  notify:      webhooks={}", self.notify.webhooks_enabled);
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Local,
}

impl FromStr for StorageBackend {
    type Err = ScrapelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" | "file" => Ok(Self::Local),
            other => Err(ScrapelineError::Other(format!("unknown storage backend '{other}'"))),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Local => "local",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// Key prefix under `data_dir` for every namespace.
    pub prefix: String,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            backend: profiled_env_parse(p, "STORAGE_BACKEND", StorageBackend::Local),
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            prefix: profiled_env_or(p, "STORAGE_PREFIX", "scrapeline"),
        }
    }
}

// ── Cache ─────────────────────────────────────────────────────

/// Whether extraction-cache hits must match the latest fetched content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Serve an extraction entry only when its content digest matches the
    /// current content-cache entry for the url.
    #[default]
    RequireFreshContent,
    /// Serve extraction entries regardless of later content refreshes.
    ServeStale,
}

impl FromStr for CachePolicy {
    type Err = ScrapelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "require_fresh_content" | "fresh" => Ok(Self::RequireFreshContent),
            "serve_stale" | "stale" => Ok(Self::ServeStale),
            other => Err(ScrapelineError::Other(format!("unknown cache policy '{other}'"))),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RequireFreshContent => "require_fresh_content",
            Self::ServeStale => "serve_stale",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub staleness: CachePolicy,
    /// Entries kept in the in-process hot tier (0 disables it).
    pub hot_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            staleness: CachePolicy::default(),
            hot_capacity: 1024,
        }
    }
}

impl CacheConfig {
    fn from_env_profiled(p: &str) -> Self {
        let defaults = Self::default();
        Self {
            staleness: profiled_env_parse(p, "CACHE_STALENESS", defaults.staleness),
            hot_capacity: profiled_env_parse(p, "CACHE_HOT_CAPACITY", defaults.hot_capacity),
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────

/// Timeout and retry backoff for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub timeout_secs: u64,
    pub backoff_secs: u64,
}

impl StageTiming {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Total delivery attempts per stage, first attempt included.
    pub max_attempts: u32,
    pub fetch: StageTiming,
    pub extract: StageTiming,
    pub store: StageTiming,
    /// How long a synchronous `create_job` waits for a terminal state.
    pub sync_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            fetch: StageTiming { timeout_secs: 60, backoff_secs: 90 },
            extract: StageTiming { timeout_secs: 120, backoff_secs: 150 },
            store: StageTiming { timeout_secs: 30, backoff_secs: 60 },
            sync_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_attempts: profiled_env_parse(p, "PIPELINE_MAX_ATTEMPTS", d.max_attempts).max(1),
            fetch: StageTiming {
                timeout_secs: profiled_env_parse(p, "FETCH_TIMEOUT_SECS", d.fetch.timeout_secs),
                backoff_secs: profiled_env_parse(p, "FETCH_BACKOFF_SECS", d.fetch.backoff_secs),
            },
            extract: StageTiming {
                timeout_secs: profiled_env_parse(p, "EXTRACT_TIMEOUT_SECS", d.extract.timeout_secs),
                backoff_secs: profiled_env_parse(p, "EXTRACT_BACKOFF_SECS", d.extract.backoff_secs),
            },
            store: StageTiming {
                timeout_secs: profiled_env_parse(p, "STORE_TIMEOUT_SECS", d.store.timeout_secs),
                backoff_secs: profiled_env_parse(p, "STORE_BACKOFF_SECS", d.store.backoff_secs),
            },
            sync_timeout_secs: profiled_env_parse(p, "SYNC_TIMEOUT_SECS", d.sync_timeout_secs),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true, tick_secs: 300 }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            enabled: profiled_env_bool(p, "SCHEDULER_ENABLED", d.enabled),
            tick_secs: profiled_env_parse(p, "SCHEDULER_TICK_SECS", d.tick_secs).max(1),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

// ── Content source ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSourceConfig {
    pub firecrawl_api_key: Option<String>,
    pub firecrawl_base_url: String,
    pub only_main_content: bool,
}

impl ContentSourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            firecrawl_api_key: profiled_env_opt(p, "FIRECRAWL_API_KEY"),
            firecrawl_base_url: profiled_env_or(p, "FIRECRAWL_BASE_URL", "https://api.firecrawl.dev"),
            only_main_content: profiled_env_bool(p, "FIRECRAWL_ONLY_MAIN_CONTENT", true),
        }
    }

    pub fn is_firecrawl_configured(&self) -> bool {
        self.firecrawl_api_key.is_some()
    }
}

// ── Extractor (OpenAI-compatible) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Longest page text sent to the model, in characters.
    pub max_content_chars: usize,
}

impl ExtractorConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_key: profiled_env_opt(p, "OPENAI_API_KEY"),
            model: profiled_env_or(p, "OPENAI_MODEL", "gpt-4o-mini"),
            base_url: profiled_env_opt(p, "OPENAI_BASE_URL"),
            temperature: profiled_env_parse(p, "EXTRACTOR_TEMPERATURE", 0.0),
            max_tokens: profiled_env_parse(p, "EXTRACTOR_MAX_TOKENS", 4096),
            max_content_chars: profiled_env_parse(p, "EXTRACTOR_MAX_CONTENT_CHARS", 100_000),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

// ── Notify ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhooks_enabled: bool,
    pub webhook_timeout_secs: u64,
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            webhooks_enabled: profiled_env_bool(p, "WEBHOOKS_ENABLED", true),
            webhook_timeout_secs: profiled_env_parse(p, "WEBHOOK_TIMEOUT_SECS", 10),
        }
    }
}
