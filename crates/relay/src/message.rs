use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope passed between pipeline stages.
///
/// The payload is MessagePack-encoded. `key` selects the ordered lane the
/// message runs on; every message with the same key is handled in FIFO order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Stage topic, one of [`crate::topics`].
    pub topic: String,
    /// Lane key; the pipeline uses the job id.
    pub key: String,

    #[serde(with = "raw")]
    pub payload: Vec<u8>,

    pub timestamp: DateTime<Utc>,
    /// Shared by a job's deliveries across stages.
    pub correlation_id: Uuid,
    /// Delivery attempt, starting at 1.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl Message {
    /// Create a first delivery, serializing the payload with MessagePack.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(topic, key, payload, Uuid::new_v4())
    }

    /// Create a message continuing an existing flow.
    pub fn with_correlation<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
        correlation_id: Uuid,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            key: key.into(),
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id,
            attempt: 1,
        })
    }

    /// Next-stage message in the same flow and lane.
    pub fn follow_up<T: Serialize>(
        &self,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Self::with_correlation(topic, self.key.clone(), payload, self.correlation_id)
    }

    /// Same message, next delivery attempt.
    pub fn redeliver(&self) -> Self {
        Self {
            timestamp: Utc::now(),
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }
}

/// Payload as a MessagePack bin rather than an array of integers.
mod raw {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(payload)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        <&[u8]>::deserialize(deserializer).map(<[u8]>::to_vec)
    }
}
