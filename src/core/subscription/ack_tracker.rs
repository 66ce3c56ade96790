use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::time::Instant;

use crate::core::message::MessageId;
use crate::core::subscription::state::Lane;

/// Identifies one delivery attempt of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag(u64);

/// Settles exactly one delivery of a message.
///
/// Once that delivery has been resolved (by a reply, an explicit call or
/// its ack deadline), the id is stale even if the message has since been
/// redelivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckId {
    message_id: MessageId,
    tag: DeliveryTag,
}

impl AckId {
    pub(crate) fn new(message_id: MessageId, tag: DeliveryTag) -> Self {
        Self { message_id, tag }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub(crate) fn tag(&self) -> DeliveryTag {
        self.tag
    }
}

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.message_id, self.tag.0)
    }
}

/// Outstanding delivery awaiting ack, nack or deadline.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub lane: Lane,
    pub deadline: Instant,
    pub attempt: u32,
    pub tag: DeliveryTag,
}

/// Outstanding deliveries of one subscription, keyed by message id.
///
/// Every resolution path (explicit ack/nack, handler reply, deadline
/// expiry, abandonment) goes through an atomic `remove_if`, so exactly one
/// of them observes the record and the rest become no-ops.
#[derive(Debug, Default)]
pub struct AckTracker {
    records: DashMap<MessageId, DeliveryRecord>,
    next_tag: AtomicU64,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_tag(&self) -> DeliveryTag {
        DeliveryTag(self.next_tag.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_dispatch(&self, record: DeliveryRecord) {
        self.records.insert(record.message_id.clone(), record);
    }

    /// Claims the record for `id`.
    ///
    /// With a tag, only that exact delivery is claimed, so a late reply to an
    /// earlier attempt cannot settle a redelivery.
    pub fn take(&self, id: &MessageId, tag: Option<DeliveryTag>) -> Option<DeliveryRecord> {
        self.records
            .remove_if(id, |_, record| tag.map_or(true, |t| record.tag == t))
            .map(|(_, record)| record)
    }

    /// Claims every record whose deadline is at or before `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<DeliveryRecord> {
        let overdue: Vec<MessageId> = self
            .records
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key().clone())
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| {
                self.records
                    .remove_if(&id, |_, record| record.deadline <= now)
                    .map(|(_, record)| record)
            })
            .collect()
    }

    /// Moves the deadline of the outstanding delivery `tag` of `id`.
    pub fn extend(&self, id: &MessageId, tag: DeliveryTag, deadline: Instant) -> bool {
        match self.records.get_mut(id) {
            Some(mut record) if record.tag == tag => {
                record.deadline = deadline;
                true
            }
            _ => false,
        }
    }

    /// Claims every outstanding record.
    pub fn take_all(&self) -> Vec<DeliveryRecord> {
        let ids: Vec<MessageId> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.records.remove(&id).map(|(_, record)| record))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
