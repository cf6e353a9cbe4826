use std::sync::Arc;

use async_trait::async_trait;

use crate::message::Message;

/// Retry classification for handler errors.
pub trait Retryable {
    /// Whether redelivering the same message may succeed.
    fn is_transient(&self) -> bool;
}

/// Consumes messages from ordered lanes.
///
/// `handle` may return a follow-up message, which is enqueued on the same
/// lane behind anything already waiting there.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Error: std::error::Error + Retryable + Send + Sync + 'static;

    async fn handle(&self, message: Message) -> Result<Option<Message>, Self::Error>;

    /// Called once a message fails terminally or runs out of attempts.
    async fn dead_letter(&self, message: Message, error: Self::Error);
}

/// Blanket implementation so `Arc<H>` can be used directly.
#[async_trait]
impl<H: MessageHandler> MessageHandler for Arc<H> {
    type Error = H::Error;

    async fn handle(&self, message: Message) -> Result<Option<Message>, Self::Error> {
        (**self).handle(message).await
    }

    async fn dead_letter(&self, message: Message, error: Self::Error) {
        (**self).dead_letter(message, error).await
    }
}
