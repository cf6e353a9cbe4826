//! FIFO-per-key dispatch with bounded redelivery.
//!
//! Every key gets a lane: a task that handles that key's messages one at a
//! time, in arrival order. Different keys run concurrently. A lane exits as
//! soon as it drains and is recreated by the next message for its key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::message::Message;
use crate::traits::{MessageHandler, Retryable};

// ── Retry policy ─────────────────────────────────────────────────────

/// How many times a message is delivered and how long to wait between tries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total deliveries, first attempt included.
    pub max_attempts: u32,
    pub default_backoff: Duration,
    per_topic: HashMap<String, Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, default_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            default_backoff,
            per_topic: HashMap::new(),
        }
    }

    /// Override the backoff for one topic.
    pub fn with_topic_backoff(mut self, topic: impl Into<String>, backoff: Duration) -> Self {
        self.per_topic.insert(topic.into(), backoff);
        self
    }

    pub fn backoff_for(&self, topic: &str) -> Duration {
        self.per_topic
            .get(topic)
            .copied()
            .unwrap_or(self.default_backoff)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────

struct Inner<H: MessageHandler> {
    handler: H,
    policy: RetryPolicy,
    lanes: Mutex<HashMap<String, UnboundedSender<Message>>>,
    /// Messages accepted but not yet finished, including ones waiting for a retry.
    pending: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

impl<H: MessageHandler> Inner<H> {
    fn lanes(&self) -> MutexGuard<'_, HashMap<String, UnboundedSender<Message>>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Routes messages to per-key lanes and applies the retry policy.
pub struct LaneDispatcher<H: MessageHandler> {
    inner: Arc<Inner<H>>,
}

impl<H: MessageHandler> Clone for LaneDispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: MessageHandler> LaneDispatcher<H> {
    pub fn new(handler: H, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                handler,
                policy,
                lanes: Mutex::new(HashMap::new()),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Accept a message. Must be called from within a tokio runtime.
    pub fn dispatch(&self, message: Message) -> Result<(), RelayError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed(message.key));
        }
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        enqueue(&self.inner, message);
        Ok(())
    }

    /// Messages accepted and not yet finished.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Number of lanes currently running.
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes().len()
    }

    /// Stop accepting new messages. Work already accepted still runs to the end.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolve once every accepted message (and its follow-ups) has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Push onto the key's lane, spawning the lane if it is not running.
///
/// Sends happen under the lanes lock, and a lane only exits after observing an
/// empty queue under the same lock, so no message is stranded.
fn enqueue<H: MessageHandler>(inner: &Arc<Inner<H>>, message: Message) {
    let key = message.key.clone();
    let mut lanes = inner.lanes();

    let message = match lanes.get(&key) {
        Some(tx) => match tx.send(message) {
            Ok(()) => return,
            Err(mpsc::error::SendError(message)) => message,
        },
        None => message,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    // The receiver is alive, so this send cannot fail.
    let _ = tx.send(message);
    lanes.insert(key.clone(), tx);
    drop(lanes);

    debug!(key = %key, "lane started");
    tokio::spawn(run_lane(inner.clone(), key, rx));
}

async fn run_lane<H: MessageHandler>(
    inner: Arc<Inner<H>>,
    key: String,
    mut rx: UnboundedReceiver<Message>,
) {
    loop {
        let message = match rx.try_recv() {
            Ok(message) => message,
            Err(TryRecvError::Empty) => {
                let mut lanes = inner.lanes();
                match rx.try_recv() {
                    Ok(message) => {
                        drop(lanes);
                        message
                    }
                    Err(_) => {
                        lanes.remove(&key);
                        debug!(key = %key, "lane drained");
                        return;
                    }
                }
            }
            Err(TryRecvError::Disconnected) => return,
        };
        process(&inner, message).await;
    }
}

async fn process<H: MessageHandler>(inner: &Arc<Inner<H>>, message: Message) {
    let topic = message.topic.clone();
    let key = message.key.clone();
    let attempt = message.attempt;

    match inner.handler.handle(message.clone()).await {
        Ok(Some(next)) => {
            inner.pending.fetch_add(1, Ordering::AcqRel);
            enqueue(inner, next);
            inner.finish_one();
        }
        Ok(None) => inner.finish_one(),
        Err(e) if e.is_transient() && inner.policy.should_retry(attempt) => {
            let backoff = inner.policy.backoff_for(&topic);
            warn!(
                key = %key,
                topic = %topic,
                attempt,
                max_attempts = inner.policy.max_attempts,
                backoff = ?backoff,
                error = %e,
                "transient failure, scheduling redelivery"
            );
            let retry = message.redeliver();
            let inner = inner.clone();
            // Pending stays claimed until the redelivery finishes.
            tokio::spawn(async move {
                tokio::time::sleep(backoff).await;
                enqueue(&inner, retry);
            });
        }
        Err(e) => {
            warn!(key = %key, topic = %topic, attempt, error = %e, "message dead-lettered");
            inner.handler.dead_letter(message, e).await;
            inner.finish_one();
        }
    }
}
