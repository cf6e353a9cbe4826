//! Identifier generation and deterministic hashing for cache and monitor keys.

use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::ScrapelineError;
use crate::schema::ExtractionSchema;

/// Length of the url hash suffix in monitor ids.
const MONITOR_HASH_LEN: usize = 12;

/// Length of the random part of job and scraper ids.
const ID_RANDOM_LEN: usize = 12;

/// SHA-256 of `input` as lowercase hex.
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    format!("{digest:x}")
}

/// Normalize a user-supplied URL.
///
/// Trims whitespace, requires an http(s) scheme and a host, lowercases the
/// host, drops default ports and the fragment.
pub fn normalize_url(raw: &str) -> Result<String, ScrapelineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScrapelineError::InvalidUrl("url is required".into()));
    }

    let mut parsed = Url::parse(trimmed)
        .map_err(|e| ScrapelineError::InvalidUrl(format!("{trimmed}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ScrapelineError::InvalidUrl(format!(
                "{trimmed}: unsupported scheme '{other}'"
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ScrapelineError::InvalidUrl(format!("{trimmed}: missing host")));
    }

    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Content cache key: hash of the normalized URL.
pub fn content_key(normalized_url: &str) -> String {
    sha256_hex(normalized_url)
}

/// Extraction cache key: hash of the normalized URL plus the canonical schema.
pub fn extraction_key(normalized_url: &str, schema: &ExtractionSchema) -> String {
    sha256_hex(&format!("{}|{}", normalized_url, schema.canonical()))
}

/// Deterministic monitor id for a (scraper, url) pair: `{scraper_id}_{hash12}`.
pub fn monitor_id(scraper_id: &str, normalized_url: &str) -> String {
    let hash = sha256_hex(normalized_url);
    format!("{}_{}", scraper_id, &hash[..MONITOR_HASH_LEN])
}

pub fn new_job_id() -> String {
    prefixed_id("job")
}

pub fn new_scraper_id() -> String {
    prefixed_id("scr")
}

fn prefixed_id(prefix: &str) -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &raw[..ID_RANDOM_LEN])
}
