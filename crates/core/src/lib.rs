pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod monitor;
pub mod schedule;
pub mod schema;
pub mod scraper;

pub use config::{CachePolicy, Config};
pub use error::*;
pub use job::*;
pub use monitor::*;
pub use schedule::*;
pub use schema::ExtractionSchema;
pub use scraper::*;
