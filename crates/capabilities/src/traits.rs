//! Capability interfaces consumed by the extraction pipeline.
//!
//! The pipeline only ever talks to these traits; concrete adapters live in the
//! sibling modules and are wired together by [`crate::Capabilities`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use scrapeline_core::{ExtractionSchema, FetchOptions, Usage};

// ── Errors ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Page not found: {0}")]
    NotFound(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Capability not configured: {0}")]
    NotConfigured(String),
}

impl CapabilityError {
    /// Timeouts, rate limits, connection drops and upstream 5xx may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::RateLimited(_) | Self::Connection(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Failures caused by the request itself (bad URL, missing page).
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NotFound(_))
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            408 | 504 => Self::Timeout(format!("upstream returned {status}")),
            429 => Self::RateLimited(body),
            404 | 410 => Self::NotFound(body),
            400 | 422 => Self::InvalidInput(body),
            _ => Self::Upstream { status, body },
        }
    }

    /// Classify a free-form error message reported by an upstream API.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(message)
        } else if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimited(message)
        } else if lower.contains("not found") || lower.contains("404") {
            Self::NotFound(message)
        } else if lower.contains("invalid") {
            Self::InvalidInput(message)
        } else {
            Self::Upstream {
                status: 0,
                body: message,
            }
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else if e.is_builder() {
            Self::InvalidInput(e.to_string())
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}

// ── Content ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Html,
    Markdown,
    Text,
}

/// Page content as returned by a [`ContentSource`], before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContent {
    pub body: String,
    pub kind: ContentKind,
    /// Page metadata reported by the source (title, status code, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Name of the source that produced the content.
    pub source: String,
}

impl RawContent {
    pub fn new(body: impl Into<String>, kind: ContentKind, source: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            kind,
            metadata: Map::new(),
            source: source.into(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Output of a [`StructuredExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub data: Value,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

impl fmt::Display for ValidationReport {
    /// First three errors, comma separated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: Vec<&str> = self.errors.iter().take(3).map(String::as_str).collect();
        write!(f, "Validation failed: {}", shown.join(", "))
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// Fetches raw page content for a URL.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent, CapabilityError>;
}

/// Converts raw content into the plain text handed to the extractor.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, raw: &RawContent) -> String;
}

/// Extracts structured fields from normalized text.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<Extraction, CapabilityError>;
}

/// Checks extracted data against the job's schema.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, data: &Value, schema: &ExtractionSchema) -> ValidationReport;
}

/// Delivers a job's terminal view to a caller-supplied endpoint.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, endpoint: &str, payload: &Value) -> Result<(), CapabilityError>;
}

// ── Arc blanket impls ────────────────────────────────────────────────

#[async_trait]
impl<T: ContentSource + ?Sized> ContentSource for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent, CapabilityError> {
        (**self).fetch(url, options).await
    }
}

#[async_trait]
impl<T: StructuredExtractor + ?Sized> StructuredExtractor for Arc<T> {
    async fn extract(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<Extraction, CapabilityError> {
        (**self).extract(text, schema).await
    }
}
