//! Firecrawl scrape API: rendered pages with JavaScript and anti-bot support.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use scrapeline_core::config::ContentSourceConfig;
use scrapeline_core::FetchOptions;

use crate::traits::{CapabilityError, ContentKind, ContentSource, RawContent};

/// Slack on top of the scrape timeout for the HTTP round trip itself.
const CLIENT_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

pub struct FirecrawlSource {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    only_main_content: bool,
}

impl FirecrawlSource {
    pub fn new(api_key: String, base_url: String, only_main_content: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            only_main_content,
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &ContentSourceConfig) -> Option<Self> {
        let api_key = config.firecrawl_api_key.clone()?;
        Some(Self::new(
            api_key,
            config.firecrawl_base_url.clone(),
            config.only_main_content,
        ))
    }
}

#[async_trait]
impl ContentSource for FirecrawlSource {
    fn name(&self) -> &str {
        "firecrawl"
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent, CapabilityError> {
        let endpoint = format!("{}/v1/scrape", self.base_url);
        let body = scrape_request(url, options, self.only_main_content);
        info!(url = %url, timeout_ms = options.timeout_ms, wait_for_ms = %body["waitFor"], "firecrawl scrape");

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_millis(options.timeout_ms) + CLIENT_TIMEOUT_SLACK)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(url = %url, status, body = %text, "firecrawl api error");
            let message = serde_json::from_str::<ScrapeResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(text);
            return Err(match CapabilityError::from_status(status, message.clone()) {
                CapabilityError::Upstream { .. } if status < 500 => CapabilityError::from_message(message),
                other => other,
            });
        }

        let parsed: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;
        let content = into_raw_content(url, parsed)?;
        debug!(url = %url, length = content.body.len(), "firecrawl scrape completed");
        Ok(content)
    }
}

/// Request body for `POST /v1/scrape`. `waitFor` is capped at half the timeout.
fn scrape_request(url: &str, options: &FetchOptions, only_main_content: bool) -> Value {
    let cap = options.timeout_ms / 2;
    let wait_for = if options.wait_for_ms > cap {
        warn!(
            wait_for_ms = options.wait_for_ms,
            timeout_ms = options.timeout_ms,
            capped = cap,
            "wait_for exceeds half of timeout, capping it"
        );
        cap
    } else {
        options.wait_for_ms
    };

    json!({
        "url": url,
        "formats": ["markdown", "html"],
        "onlyMainContent": only_main_content,
        "timeout": options.timeout_ms,
        "waitFor": wait_for,
    })
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    html: Option<String>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

fn into_raw_content(url: &str, response: ScrapeResponse) -> Result<RawContent, CapabilityError> {
    if !response.success {
        let message = response.error.unwrap_or_else(|| "scrape unsuccessful".into());
        return Err(CapabilityError::from_message(message));
    }
    let data = response
        .data
        .ok_or_else(|| CapabilityError::MalformedResponse("response has no data".into()))?;

    let metadata = page_metadata(url, &data.metadata);
    let markdown = data.markdown.unwrap_or_default();
    let content = if markdown.trim().is_empty() {
        RawContent::new(data.html.unwrap_or_default(), ContentKind::Html, "firecrawl")
    } else {
        RawContent::new(markdown, ContentKind::Markdown, "firecrawl")
    };
    Ok(content.with_metadata(metadata))
}

/// Project Firecrawl's camelCase metadata onto the fields jobs report.
fn page_metadata(url: &str, raw: &Map<String, Value>) -> Map<String, Value> {
    let pick = |key: &str| raw.get(key).cloned().unwrap_or(Value::Null);
    let mut metadata = Map::new();
    metadata.insert("title".into(), pick("title"));
    metadata.insert("description".into(), pick("description"));
    metadata.insert("url".into(), raw.get("url").cloned().unwrap_or_else(|| json!(url)));
    metadata.insert(
        "source_url".into(),
        raw.get("sourceURL").cloned().unwrap_or_else(|| json!(url)),
    );
    metadata.insert("language".into(), pick("language"));
    metadata.insert("status_code".into(), pick("statusCode"));
    metadata.insert("content_type".into(), pick("contentType"));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(timeout_ms: u64, wait_for_ms: u64) -> FetchOptions {
        FetchOptions {
            timeout_ms,
            wait_for_ms,
            use_simple_scraper: false,
        }
    }

    #[test]
    fn request_caps_wait_for_at_half_timeout() {
        let body = scrape_request("https://example.com/", &options(10_000, 8_000), true);
        assert_eq!(body["waitFor"], 5_000);
        assert_eq!(body["timeout"], 10_000);
        assert_eq!(body["onlyMainContent"], true);

        let body = scrape_request("https://example.com/", &options(30_000, 2_000), false);
        assert_eq!(body["waitFor"], 2_000);
    }

    #[test]
    fn parses_markdown_and_metadata() {
        let response: ScrapeResponse = serde_json::from_value(json!({
            "success": true,
            "data": {
                "markdown": "# Example Domain",
                "html": "<h1>Example Domain</h1>",
                "metadata": {"title": "Example", "sourceURL": "https://example.com", "statusCode": 200}
            }
        }))
        .unwrap();

        let content = into_raw_content("https://example.com/", response).unwrap();
        assert_eq!(content.kind, ContentKind::Markdown);
        assert_eq!(content.body, "# Example Domain");
        assert_eq!(content.metadata["title"], "Example");
        assert_eq!(content.metadata["status_code"], 200);
        assert_eq!(content.metadata["url"], "https://example.com/");
    }

    #[test]
    fn falls_back_to_html_when_markdown_missing() {
        let response: ScrapeResponse = serde_json::from_value(json!({
            "success": true,
            "data": {"markdown": "  ", "html": "<p>hi</p>"}
        }))
        .unwrap();
        let content = into_raw_content("https://example.com/", response).unwrap();
        assert_eq!(content.kind, ContentKind::Html);
    }

    #[test]
    fn unsuccessful_response_is_classified() {
        let response: ScrapeResponse =
            serde_json::from_value(json!({"success": false, "error": "Request timed out"})).unwrap();
        let err = into_raw_content("https://example.com/", response).unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn from_config_requires_key() {
        let mut config = ContentSourceConfig {
            firecrawl_api_key: None,
            firecrawl_base_url: "https://api.firecrawl.dev/".into(),
            only_main_content: true,
        };
        assert!(FirecrawlSource::from_config(&config).is_none());
        config.firecrawl_api_key = Some("fc-test".into());
        let source = FirecrawlSource::from_config(&config).unwrap();
        assert_eq!(source.base_url, "https://api.firecrawl.dev");
    }
}
