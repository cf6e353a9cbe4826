//! Composite content source: primary first, lower-fidelity fallback second.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use scrapeline_core::FetchOptions;

use crate::traits::{CapabilityError, ContentSource, RawContent};

pub struct FallbackSource {
    primary: Option<Arc<dyn ContentSource>>,
    fallback: Arc<dyn ContentSource>,
}

impl FallbackSource {
    /// Without a primary every fetch goes straight to `fallback`.
    pub fn new(primary: Option<Arc<dyn ContentSource>>, fallback: Arc<dyn ContentSource>) -> Self {
        match &primary {
            Some(p) => info!(primary = p.name(), fallback = fallback.name(), "content source fallback enabled"),
            None => info!(fallback = fallback.name(), "no primary content source configured"),
        }
        Self { primary, fallback }
    }
}

#[async_trait]
impl ContentSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<RawContent, CapabilityError> {
        let primary = match &self.primary {
            Some(primary) if !options.use_simple_scraper => primary,
            _ => return self.fallback.fetch(url, options).await,
        };

        match primary.fetch(url, options).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_input_error() => Err(e),
            Err(primary_err) => {
                warn!(
                    url = %url,
                    source = primary.name(),
                    error = %primary_err,
                    "primary content source failed, trying fallback"
                );
                match self.fallback.fetch(url, options).await {
                    Ok(content) => Ok(content),
                    Err(fallback_err) => {
                        warn!(url = %url, source = self.fallback.name(), error = %fallback_err, "fallback content source failed");
                        Err(primary_err)
                    }
                }
            }
        }
    }
}
