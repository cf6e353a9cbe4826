//! Job orchestration: stage pipeline, progress fan-out, monitor scheduling
//! and the caller-facing [`ExtractionService`].

pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod stages;

pub use dispatcher::{JobDispatcher, Pipeline};
pub use error::{PipelineError, Result};
pub use lifecycle::{JobResultView, JobStatusView, JobTracker};
pub use progress::{ProgressPublisher, ProgressSubscription, ProgressUpdate};
pub use scheduler::{MonitorScheduler, TickReport};
pub use service::{
    ExtractionService, JobRequest, JobTarget, JobTicket, MonitorAction, MonitoringInfo,
    RegisteredScraper, RequestOptions,
};
pub use stages::{StageContext, StageError};
