use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use scrapeline_core::config::ExtractorConfig;
use scrapeline_core::{ExtractionSchema, Usage};

use crate::prompt::{clip_content, user_prompt, SYSTEM_PROMPT};
use crate::traits::{CapabilityError, Extraction, StructuredExtractor};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Structured extraction through an OpenAI-compatible chat completions API.
pub struct OpenAiExtractor {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    max_content_chars: usize,
}

impl OpenAiExtractor {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key),
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            max_content_chars: 100_000,
        }
    }

    /// A missing API key is reported on the first extraction, not here.
    pub fn from_config(config: &ExtractorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_content_chars: config.max_content_chars,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, text: &str, schema: &ExtractionSchema) -> Value {
        let content = clip_content(text, self.max_content_chars);
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt(schema, content)},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        })
    }
}

#[async_trait]
impl StructuredExtractor for OpenAiExtractor {
    async fn extract(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<Extraction, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::NotConfigured("OPENAI_API_KEY is not set".into()))?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.request_body(text, schema);
        debug!(model = %self.model, content_length = text.len(), "OpenAI request to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            error!(status, body = %body, "OpenAI API error");
            return Err(CapabilityError::from_status(status, body));
        }

        let resp: Value = response
            .json()
            .await
            .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;
        let extraction = parse_completion(&resp, &self.model)?;
        info!(
            model = extraction.model.as_deref().unwrap_or(&self.model),
            total_tokens = extraction.usage.as_ref().and_then(|u| u.total_tokens),
            "extraction completed"
        );
        Ok(extraction)
    }
}

/// Pull the JSON document and token usage out of a chat completion response.
fn parse_completion(resp: &Value, requested_model: &str) -> Result<Extraction, CapabilityError> {
    let choice = resp["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| CapabilityError::MalformedResponse("OpenAI returned empty response".into()))?;

    let content = choice["message"]["content"].as_str().unwrap_or_default();
    if content.trim().is_empty() {
        return Err(CapabilityError::MalformedResponse("OpenAI returned empty content".into()));
    }

    let data: Value = serde_json::from_str(content).map_err(|e| {
        let preview: String = content.chars().take(200).collect();
        CapabilityError::MalformedResponse(format!("Failed to parse JSON response: {e} ({preview})"))
    })?;

    let usage = resp.get("usage").filter(|u| u.is_object()).map(|u| Usage {
        prompt_tokens: u["prompt_tokens"].as_u64(),
        completion_tokens: u["completion_tokens"].as_u64(),
        total_tokens: u["total_tokens"].as_u64(),
    });

    Ok(Extraction {
        data,
        model: Some(resp["model"].as_str().unwrap_or(requested_model).to_string()),
        usage,
    })
}
