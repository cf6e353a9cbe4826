//! In-process stage messaging: MessagePack envelopes, FIFO-per-key lanes with
//! bounded redelivery, keyed broadcast fan-out, and the worker lifecycle.

pub mod broadcast;
pub mod error;
pub mod lanes;
pub mod message;
pub mod topics;
pub mod traits;
pub mod worker;

pub use broadcast::KeyedBroadcast;
pub use error::RelayError;
pub use lanes::{LaneDispatcher, RetryPolicy};
pub use message::Message;
pub use traits::{MessageHandler, Retryable};
pub use worker::{Worker, WorkerBuilder, WorkerHealth, WorkerRunner, WorkerRunnerConfig, WorkerStatus};
