use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::core::error::{Result, SeqError};
use crate::core::message::{Message, MessageId};
use crate::core::queue::{OrderingKeyQueue, Resolution};

/// Upper bound for ack deadlines and deadline extensions, in seconds.
pub const MAX_ACK_DEADLINE_SECS: u32 = 600;

/// Terminal disposal after repeated delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterPolicy {
    /// Topic receiving exhausted messages. `None` drops them.
    pub dead_letter_topic: Option<String>,
    /// Delivery attempts allowed before a nack or timeout becomes terminal.
    pub max_delivery_attempts: u32,
}

impl DeadLetterPolicy {
    pub fn new(max_delivery_attempts: u32) -> Self {
        Self {
            dead_letter_topic: None,
            max_delivery_attempts,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }
}

/// Options accepted by `create_subscription`.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    pub enable_message_ordering: bool,
    /// Falls back to the broker default when unset.
    pub ack_deadline_seconds: Option<u32>,
    pub dead_letter_policy: Option<DeadLetterPolicy>,
}

impl SubscriptionOptions {
    pub fn ordered() -> Self {
        Self {
            enable_message_ordering: true,
            ..Default::default()
        }
    }

    pub fn with_ack_deadline(mut self, seconds: u32) -> Self {
        self.ack_deadline_seconds = Some(seconds);
        self
    }

    pub fn with_dead_letter_policy(mut self, policy: DeadLetterPolicy) -> Self {
        self.dead_letter_policy = Some(policy);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(secs) = self.ack_deadline_seconds {
            validate_ack_deadline(secs)?;
        }
        if let Some(policy) = &self.dead_letter_policy {
            if policy.max_delivery_attempts == 0 {
                return Err(SeqError::InvalidArgument(
                    "max_delivery_attempts must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_ack_deadline(seconds: u32) -> Result<()> {
    if seconds == 0 || seconds > MAX_ACK_DEADLINE_SECS {
        return Err(SeqError::InvalidArgument(format!(
            "ack deadline must be within 1..={MAX_ACK_DEADLINE_SECS} seconds, got {seconds}"
        )));
    }
    Ok(())
}

/// Snapshot returned by create/get calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMetadata {
    pub name: String,
    pub topic: String,
    pub ack_deadline_seconds: u32,
    pub enable_message_ordering: bool,
    pub dead_letter_policy: Option<DeadLetterPolicy>,
}

/// Where a message waits and is settled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Ordered lane of one ordering key.
    Keyed(String),
    /// Messages without ordering constraints.
    Unkeyed,
}

/// Queues and dispatch bookkeeping of one subscription.
///
/// `ready` is a round-robin ring holding each dispatchable lane exactly
/// once: a keyed lane enters when it gains a head with nothing in flight,
/// and the unkeyed lane stays listed while it has pending messages.
#[derive(Debug)]
pub struct SubscriptionState {
    ordering_enabled: bool,
    queues: HashMap<String, OrderingKeyQueue>,
    unkeyed: VecDeque<Message>,
    unkeyed_in_flight: HashMap<MessageId, Message>,
    unkeyed_listed: bool,
    ready: VecDeque<Lane>,
    outstanding: usize,
}

impl SubscriptionState {
    pub fn new(ordering_enabled: bool) -> Self {
        Self {
            ordering_enabled,
            queues: HashMap::new(),
            unkeyed: VecDeque::new(),
            unkeyed_in_flight: HashMap::new(),
            unkeyed_listed: false,
            ready: VecDeque::new(),
            outstanding: 0,
        }
    }

    fn lane_for(&self, message: &Message) -> Lane {
        match message.ordering_key() {
            Some(key) if self.ordering_enabled => Lane::Keyed(key.to_owned()),
            _ => Lane::Unkeyed,
        }
    }

    pub fn enqueue(&mut self, message: Message) {
        match self.lane_for(&message) {
            Lane::Keyed(key) => {
                let queue = self
                    .queues
                    .entry(key.clone())
                    .or_insert_with(|| OrderingKeyQueue::new(key.clone()));
                let was_ready = queue.is_ready();
                queue.enqueue(message);
                if !was_ready && queue.is_ready() {
                    self.ready.push_back(Lane::Keyed(key));
                }
            }
            Lane::Unkeyed => {
                self.unkeyed.push_back(message);
                self.list_unkeyed();
            }
        }
    }

    fn list_unkeyed(&mut self) {
        if !self.unkeyed_listed && !self.unkeyed.is_empty() {
            self.unkeyed_listed = true;
            self.ready.push_back(Lane::Unkeyed);
        }
    }

    /// Takes the next head in round-robin order across ready lanes.
    pub fn next_dispatch(&mut self) -> Option<(Lane, Message)> {
        while let Some(lane) = self.ready.pop_front() {
            match &lane {
                Lane::Keyed(key) => {
                    let Some(queue) = self.queues.get_mut(key) else {
                        continue;
                    };
                    if let Some(message) = queue.try_dispatch() {
                        self.outstanding += 1;
                        return Some((lane, message));
                    }
                }
                Lane::Unkeyed => {
                    self.unkeyed_listed = false;
                    let Some(mut message) = self.unkeyed.pop_front() else {
                        continue;
                    };
                    message.attempt += 1;
                    self.unkeyed_in_flight
                        .insert(message.id.clone(), message.clone());
                    self.list_unkeyed();
                    self.outstanding += 1;
                    return Some((lane, message));
                }
            }
        }
        None
    }

    /// Acks or nacks the in-flight message `id` on `lane`.
    ///
    /// Returns `false` if that message is not in flight there.
    pub fn resolve(&mut self, lane: &Lane, id: &MessageId, resolution: Resolution) -> bool {
        match lane {
            Lane::Keyed(key) => {
                let Some(queue) = self.queues.get_mut(key) else {
                    return false;
                };
                if queue.in_flight().map(|m| &m.id) != Some(id) {
                    return false;
                }
                queue.resolve(resolution);
                self.outstanding -= 1;
                self.after_keyed_change(key);
                true
            }
            Lane::Unkeyed => {
                let Some(message) = self.unkeyed_in_flight.remove(id) else {
                    return false;
                };
                if resolution == Resolution::Nack {
                    self.unkeyed.push_front(message);
                    self.list_unkeyed();
                }
                self.outstanding -= 1;
                true
            }
        }
    }

    /// Removes the in-flight message `id` permanently.
    pub fn drop_in_flight(&mut self, lane: &Lane, id: &MessageId) -> Option<Message> {
        let dropped = match lane {
            Lane::Keyed(key) => {
                let queue = self.queues.get_mut(key)?;
                if queue.in_flight().map(|m| &m.id) != Some(id) {
                    return None;
                }
                let message = queue.drop_in_flight();
                self.after_keyed_change(key);
                message
            }
            Lane::Unkeyed => self.unkeyed_in_flight.remove(id),
        };
        if dropped.is_some() {
            self.outstanding -= 1;
        }
        dropped
    }

    fn after_keyed_change(&mut self, key: &str) {
        let Some(queue) = self.queues.get(key) else {
            return;
        };
        if queue.is_ready() {
            self.ready.push_back(Lane::Keyed(key.to_owned()));
        } else if queue.is_idle() {
            self.queues.remove(key);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn backlog(&self) -> usize {
        self.unkeyed.len() + self.queues.values().map(|q| q.pending_len()).sum::<usize>()
    }

    pub fn key_count(&self) -> usize {
        self.queues.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::PublishRequest;

    fn msg(id: &str, key: Option<&str>) -> Message {
        let mut req = PublishRequest::new(id.to_string());
        if let Some(k) = key {
            req = req.with_ordering_key(k);
        }
        req.into_message(MessageId::from(id))
    }

    fn ids(batch: &[(Lane, Message)]) -> Vec<&str> {
        batch.iter().map(|(_, m)| m.id.as_str()).collect()
    }

    fn drain(state: &mut SubscriptionState) -> Vec<(Lane, Message)> {
        std::iter::from_fn(|| state.next_dispatch()).collect()
    }

    #[test]
    fn one_in_flight_per_key_and_round_robin_across_keys() {
        let mut state = SubscriptionState::new(true);
        state.enqueue(msg("a1", Some("a")));
        state.enqueue(msg("a2", Some("a")));
        state.enqueue(msg("b1", Some("b")));

        let batch = drain(&mut state);
        assert_eq!(ids(&batch), vec!["a1", "b1"]);
        assert_eq!(state.outstanding(), 2);

        let (lane, m) = &batch[0];
        assert!(state.resolve(lane, &m.id, Resolution::Ack));
        let next = drain(&mut state);
        assert_eq!(ids(&next), vec!["a2"]);
    }

    #[test]
    fn nack_redelivers_same_message_before_successor() {
        let mut state = SubscriptionState::new(true);
        state.enqueue(msg("m1", Some("k")));
        state.enqueue(msg("m2", Some("k")));

        let (lane, first) = state.next_dispatch().unwrap();
        assert!(state.next_dispatch().is_none());
        state.resolve(&lane, &first.id, Resolution::Nack);

        let (_, again) = state.next_dispatch().unwrap();
        assert_eq!(again.id.as_str(), "m1");
        assert_eq!(again.attempt, 2);
    }

    #[test]
    fn unordered_subscription_never_blocks() {
        let mut state = SubscriptionState::new(false);
        state.enqueue(msg("1", Some("k")));
        state.enqueue(msg("2", Some("k")));
        state.enqueue(msg("3", None));

        let batch = drain(&mut state);
        assert_eq!(ids(&batch), vec!["1", "2", "3"]);
        assert!(batch.iter().all(|(lane, _)| *lane == Lane::Unkeyed));
    }

    #[test]
    fn unkeyed_lane_takes_turns_with_keys() {
        let mut state = SubscriptionState::new(true);
        state.enqueue(msg("u1", None));
        state.enqueue(msg("u2", None));
        state.enqueue(msg("k1", Some("k")));

        let batch = drain(&mut state);
        assert_eq!(ids(&batch), vec!["u1", "k1", "u2"]);
    }

    #[test]
    fn idle_key_is_forgotten() {
        let mut state = SubscriptionState::new(true);
        state.enqueue(msg("m1", Some("k")));
        let (lane, m) = state.next_dispatch().unwrap();
        assert_eq!(state.key_count(), 1);
        state.resolve(&lane, &m.id, Resolution::Ack);
        assert_eq!(state.key_count(), 0);
        assert_eq!(state.outstanding(), 0);
    }

    #[test]
    fn resolve_of_wrong_message_is_rejected() {
        let mut state = SubscriptionState::new(true);
        state.enqueue(msg("m1", Some("k")));
        let (lane, _) = state.next_dispatch().unwrap();
        assert!(!state.resolve(&lane, &MessageId::from("other"), Resolution::Ack));
        assert_eq!(state.outstanding(), 1);
    }

    #[test]
    fn dropped_message_unblocks_key() {
        let mut state = SubscriptionState::new(true);
        state.enqueue(msg("m1", Some("k")));
        state.enqueue(msg("m2", Some("k")));
        let (lane, m1) = state.next_dispatch().unwrap();

        let dropped = state.drop_in_flight(&lane, &m1.id).unwrap();
        assert_eq!(dropped.id.as_str(), "m1");
        let (_, m2) = state.next_dispatch().unwrap();
        assert_eq!(m2.id.as_str(), "m2");
        assert_eq!(state.backlog(), 0);
    }
}
