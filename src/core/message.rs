use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SeqError};
use crate::core::subscription::AckId;

/// Broker-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_owned())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        MessageId(s)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A published message as owned by a subscription.
///
/// `attempt` is zero while the message has never been dispatched. The copy
/// handed to a handler carries the 1-based delivery attempt and the
/// [`AckId`] that settles that one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub ordering_key: Option<String>,
    pub payload: Bytes,
    pub attributes: BTreeMap<String, String>,
    /// Milliseconds since the Unix epoch.
    pub publish_time: u64,
    pub attempt: u32,
    /// Set only on delivered copies.
    pub ack_id: Option<AckId>,
}

impl Message {
    pub fn ordering_key(&self) -> Option<&str> {
        self.ordering_key.as_deref()
    }

    pub fn ack_id(&self) -> Option<&AckId> {
        self.ack_id.as_ref()
    }
}

/// Caller-supplied content of a publish call.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub payload: Bytes,
    pub ordering_key: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl PublishRequest {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = Some(key.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Checks payload and ordering key against the configured limits.
    pub fn validate(&self, max_payload_bytes: usize, max_key_bytes: usize) -> Result<()> {
        if self.payload.is_empty() {
            return Err(SeqError::InvalidArgument("payload must not be empty".into()));
        }
        if self.payload.len() > max_payload_bytes {
            return Err(SeqError::InvalidArgument(format!(
                "payload is {} bytes, limit is {max_payload_bytes}",
                self.payload.len()
            )));
        }
        if let Some(key) = &self.ordering_key {
            if key.is_empty() {
                return Err(SeqError::InvalidArgument(
                    "ordering key must not be empty when present".into(),
                ));
            }
            if key.len() > max_key_bytes {
                return Err(SeqError::InvalidArgument(format!(
                    "ordering key is {} bytes, limit is {max_key_bytes}",
                    key.len()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn into_message(self, id: MessageId) -> Message {
        Message {
            id,
            ordering_key: self.ordering_key,
            payload: self.payload,
            attributes: self.attributes,
            publish_time: current_timestamp(),
            attempt: 0,
            ack_id: None,
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonically increasing id source, one per broker.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> MessageId {
        MessageId(self.next.fetch_add(1, Ordering::Relaxed).to_string())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
