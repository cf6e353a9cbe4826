//! Stage topics.
//!
//! Topics follow the pattern `scrapeline.<subject>.<event>`. Each one names the
//! event that makes the next stage runnable.

/// A job was created (or resumed) and needs its page content.
pub const EXTRACTION_REQUESTED: &str = "scrapeline.extraction.requested";

/// Normalized content is stored and the job is ready for extraction.
pub const WEBPAGE_FETCHED: &str = "scrapeline.webpage.fetched";

/// Extractor output is stored and awaits validation.
pub const EXTRACTION_COMPLETED: &str = "scrapeline.extraction.completed";
