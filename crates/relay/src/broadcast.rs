use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

/// Fan-out hub with one bounded broadcast channel per key.
///
/// Publishing never blocks: receivers that fall behind lose the oldest
/// values and observe `RecvError::Lagged`.
pub struct KeyedBroadcast<T: Clone> {
    channels: Mutex<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> KeyedBroadcast<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<T>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver for every value published under `key` from now on.
    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<T> {
        let mut channels = self.channels();
        match channels.get(key) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(self.capacity);
                channels.insert(key.to_string(), tx);
                rx
            }
        }
    }

    /// Deliver to current subscribers. Returns how many received it.
    pub fn publish(&self, key: &str, value: T) -> usize {
        let mut channels = self.channels();
        let Some(tx) = channels.get(key) else {
            return 0;
        };
        match tx.send(value) {
            Ok(n) => n,
            Err(_) => {
                // Every receiver is gone.
                channels.remove(key);
                0
            }
        }
    }

    /// Drop the key's channel. Receivers drain what is buffered, then see `Closed`.
    pub fn close(&self, key: &str) {
        self.channels().remove(key);
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.channels()
            .get(key)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Number of keys with an open channel.
    pub fn open_channels(&self) -> usize {
        self.channels().len()
    }
}
