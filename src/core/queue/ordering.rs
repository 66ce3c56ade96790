use std::collections::VecDeque;

use crate::core::message::Message;

/// Terminal or retry outcome applied to a key's in-flight message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Processed; discard the message.
    Ack,
    /// Failed; put it back at the head of the key.
    Nack,
}

/// Per-key FIFO with at most one message in flight.
///
/// The head only moves to `in_flight` while nothing else for the key is
/// outstanding, and a nacked message returns to the front, so no later
/// message of the same key can overtake it.
#[derive(Debug)]
pub struct OrderingKeyQueue {
    key: String,
    pending: VecDeque<Message>,
    in_flight: Option<Message>,
}

impl OrderingKeyQueue {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pending: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn enqueue(&mut self, message: Message) {
        self.pending.push_back(message);
    }

    /// Moves the head into flight when the key is unblocked.
    ///
    /// The returned copy carries the incremented delivery attempt.
    pub fn try_dispatch(&mut self) -> Option<Message> {
        if self.in_flight.is_some() {
            return None;
        }
        let mut head = self.pending.pop_front()?;
        head.attempt += 1;
        self.in_flight = Some(head.clone());
        Some(head)
    }

    /// Applies an ack or nack to the in-flight message.
    ///
    /// Returns `false` when nothing was in flight.
    pub fn resolve(&mut self, resolution: Resolution) -> bool {
        let Some(message) = self.in_flight.take() else {
            return false;
        };
        if resolution == Resolution::Nack {
            self.pending.push_front(message);
        }
        true
    }

    /// Removes the in-flight message for good, unblocking the key.
    pub fn drop_in_flight(&mut self) -> Option<Message> {
        self.in_flight.take()
    }

    pub fn in_flight(&self) -> Option<&Message> {
        self.in_flight.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing in flight and something waiting.
    pub fn is_ready(&self) -> bool {
        self.in_flight.is_none() && !self.pending.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}
