//! Plain HTTP content source. No JavaScript rendering, no anti-bot handling.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use scrapeline_core::FetchOptions;

use crate::traits::{CapabilityError, ContentKind, ContentSource, RawContent};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_REDIRECTS: usize = 5;

pub struct SimpleHttpSource {
    client: reqwest::Client,
}

impl SimpleHttpSource {
    pub fn new() -> Result<Self, CapabilityError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| CapabilityError::NotConfigured(format!("http client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ContentSource for SimpleHttpSource {
    fn name(&self) -> &str {
        "simple"
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent, CapabilityError> {
        let timeout = Duration::from_millis(options.timeout_ms.max(1));
        info!(url = %url, timeout_ms = options.timeout_ms, "simple http fetch");

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout(format!(
                        "Request timeout after {} seconds",
                        timeout.as_secs_f64()
                    ))
                } else {
                    e.into()
                }
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        if !response.status().is_success() {
            if status == 404 {
                warn!(url = %url, "page not found");
                return Err(CapabilityError::NotFound(format!("Page not found (404): {url}")));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::from_status(status, truncate(&body, 200)));
        }

        let body = response.text().await?;
        info!(url = %url, status, html_length = body.len(), %content_type, "simple http fetch completed");

        Ok(RawContent::new(body, content_kind(&content_type), self.name())
            .with_metadata(page_metadata(url, status, &content_type)))
    }
}

fn content_kind(content_type: &str) -> ContentKind {
    let lower = content_type.to_ascii_lowercase();
    if lower.contains("html") || lower == "unknown" {
        ContentKind::Html
    } else if lower.contains("markdown") {
        ContentKind::Markdown
    } else {
        ContentKind::Text
    }
}

fn page_metadata(url: &str, status: u16, content_type: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("source_url".into(), json!(url));
    metadata.insert("status_code".into(), json!(status));
    metadata.insert("content_type".into(), json!(content_type));
    metadata
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
