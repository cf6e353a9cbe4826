pub mod fallback;
pub mod firecrawl;
pub mod http;
pub mod normalizer;
pub mod openai;
pub mod prompt;
pub mod traits;
pub mod validator;
pub mod webhook;

use std::sync::Arc;

use tracing::{info, warn};

use scrapeline_core::Config;

pub use fallback::FallbackSource;
pub use firecrawl::FirecrawlSource;
pub use http::SimpleHttpSource;
pub use normalizer::HtmlNormalizer;
pub use openai::OpenAiExtractor;
pub use traits::*;
pub use validator::JsonSchemaValidator;
pub use webhook::WebhookNotifier;

/// Every external capability the pipeline calls, behind trait objects.
#[derive(Clone)]
pub struct Capabilities {
    pub source: Arc<dyn ContentSource>,
    pub normalizer: Arc<dyn TextNormalizer>,
    pub extractor: Arc<dyn StructuredExtractor>,
    pub validator: Arc<dyn SchemaValidator>,
    /// `None` disables completion webhooks.
    pub notifier: Option<Arc<dyn CompletionNotifier>>,
}

impl Capabilities {
    /// Reference adapters: Firecrawl with plain HTTP fallback, htmd
    /// normalization, OpenAI extraction and JSON Schema validation.
    pub fn from_config(config: &Config) -> Result<Self, CapabilityError> {
        let simple: Arc<dyn ContentSource> = Arc::new(SimpleHttpSource::new()?);
        let primary = FirecrawlSource::from_config(&config.content)
            .map(|source| Arc::new(source) as Arc<dyn ContentSource>);
        let source = FallbackSource::new(primary, simple);

        let extractor = OpenAiExtractor::from_config(&config.extractor);
        if config.extractor.is_configured() {
            info!(model = extractor.model(), "structured extractor ready");
        } else {
            warn!("OPENAI_API_KEY not set, extraction stages will fail");
        }

        Ok(Self {
            source: Arc::new(source),
            normalizer: Arc::new(HtmlNormalizer::new()),
            extractor: Arc::new(extractor),
            validator: Arc::new(JsonSchemaValidator::new()),
            notifier: WebhookNotifier::from_config(&config.notify)
                .map(|n| Arc::new(n) as Arc<dyn CompletionNotifier>),
        })
    }
}
