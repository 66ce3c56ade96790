//! Subscription state, ack tracking and settlement.
//!
//! A [`Subscription`] owns its queues (behind one short-held mutex), the
//! [`AckTracker`] of outstanding deliveries and a `Notify` that wakes the
//! delivery scheduler whenever new work may be dispatchable.

pub mod ack_tracker;
pub mod state;
pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::core::clock::Clock;
use crate::core::dlq::{DeadLetter, DeadLetterSink, FailureReason};
use crate::core::error::Result;
use crate::core::message::{Message, MessageId};
use crate::core::queue::Resolution;

pub use ack_tracker::{AckId, AckTracker, DeliveryRecord, DeliveryTag};
pub use state::{
    DeadLetterPolicy, Lane, SubscriptionMetadata, SubscriptionOptions, SubscriptionState,
    MAX_ACK_DEADLINE_SECS,
};
pub use stats::{SubscriptionStats, SubscriptionStatsSnapshot};

/// Result of an ack, nack or deadline change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The outstanding delivery was resolved or updated.
    Applied,
    /// Nothing outstanding under that id: already settled, expired or never
    /// dispatched.
    Stale,
}

/// How an outstanding delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Ack,
    Nack,
    Timeout,
    /// Subscriber went away; requeue without counting a failure.
    Release,
}

/// A message handed to the scheduler for delivery.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub message: Message,
    pub tag: DeliveryTag,
}

#[derive(Debug)]
pub struct Subscription {
    metadata: SubscriptionMetadata,
    state: Mutex<SubscriptionState>,
    tracker: AckTracker,
    stats: SubscriptionStats,
    notify: Notify,
    clock: Arc<dyn Clock>,
    dead_letter_sink: Weak<dyn DeadLetterSink>,
    attached: AtomicBool,
    deleted: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        metadata: SubscriptionMetadata,
        clock: Arc<dyn Clock>,
        dead_letter_sink: Weak<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            state: Mutex::new(SubscriptionState::new(metadata.enable_message_ordering)),
            metadata,
            tracker: AckTracker::new(),
            stats: SubscriptionStats::default(),
            notify: Notify::new(),
            clock,
            dead_letter_sink,
            attached: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &SubscriptionMetadata {
        &self.metadata
    }

    fn ack_deadline(&self) -> Duration {
        Duration::from_secs(u64::from(self.metadata.ack_deadline_seconds))
    }

    /// Appends a freshly published message and wakes the scheduler.
    pub(crate) fn enqueue(&self, message: Message) {
        self.state.lock().enqueue(message);
        SubscriptionStats::bump(&self.stats.messages_published);
        self.notify.notify_one();
    }

    /// Pops the next fair head and registers its delivery record.
    pub(crate) fn dispatch_next(&self, max_outstanding: usize) -> Option<Dispatch> {
        let (lane, mut message) = {
            let mut state = self.state.lock();
            if state.outstanding() >= max_outstanding {
                return None;
            }
            state.next_dispatch()?
        };

        let tag = self.tracker.next_tag();
        self.tracker.on_dispatch(DeliveryRecord {
            message_id: message.id.clone(),
            lane,
            deadline: self.clock.now() + self.ack_deadline(),
            attempt: message.attempt,
            tag,
        });
        message.ack_id = Some(AckId::new(message.id.clone(), tag));
        SubscriptionStats::bump(&self.stats.messages_delivered);
        debug!(
            target: "seqmq::subscription",
            subscription = %self.metadata.name,
            message_id = %message.id,
            ordering_key = ?message.ordering_key,
            attempt = message.attempt,
            "dispatching message"
        );
        Some(Dispatch { message, tag })
    }

    /// Resolves an outstanding delivery. The first resolution wins.
    pub(crate) fn settle(
        &self,
        id: &MessageId,
        tag: Option<DeliveryTag>,
        disposition: Disposition,
    ) -> Settlement {
        match self.tracker.take(id, tag) {
            Some(record) => {
                self.apply(record, disposition);
                Settlement::Applied
            }
            None => {
                SubscriptionStats::bump(&self.stats.stale_settlements);
                warn!(
                    target: "seqmq::subscription",
                    subscription = %self.metadata.name,
                    message_id = %id,
                    ?disposition,
                    "ignoring settlement for a message that is not outstanding"
                );
                Settlement::Stale
            }
        }
    }

    /// Acks the delivery `ack_id` was issued for. Stale once that delivery
    /// was resolved, even if the message has been redelivered since.
    pub fn ack(&self, ack_id: &AckId) -> Settlement {
        self.settle(ack_id.message_id(), Some(ack_id.tag()), Disposition::Ack)
    }

    pub fn nack(&self, ack_id: &AckId) -> Settlement {
        self.settle(ack_id.message_id(), Some(ack_id.tag()), Disposition::Nack)
    }

    /// Sets the ack deadline of an outstanding delivery to `seconds` from
    /// now. Zero nacks it.
    pub fn modify_ack_deadline(&self, ack_id: &AckId, seconds: u32) -> Result<Settlement> {
        if seconds == 0 {
            return Ok(self.nack(ack_id));
        }
        state::validate_ack_deadline(seconds)?;
        let deadline = self.clock.now() + Duration::from_secs(u64::from(seconds));
        let id = ack_id.message_id();
        if self.tracker.extend(id, ack_id.tag(), deadline) {
            Ok(Settlement::Applied)
        } else {
            SubscriptionStats::bump(&self.stats.stale_settlements);
            warn!(
                target: "seqmq::subscription",
                subscription = %self.metadata.name,
                message_id = %id,
                "ignoring deadline change for a message that is not outstanding"
            );
            Ok(Settlement::Stale)
        }
    }

    /// Treats every delivery past its deadline as an implicit nack.
    pub(crate) fn expire_overdue(&self) -> usize {
        let expired = self.tracker.take_expired(self.clock.now());
        let count = expired.len();
        for record in expired {
            info!(
                target: "seqmq::subscription",
                subscription = %self.metadata.name,
                message_id = %record.message_id,
                attempt = record.attempt,
                "ack deadline exceeded, scheduling redelivery"
            );
            self.apply(record, Disposition::Timeout);
        }
        count
    }

    /// Requeues every outstanding delivery at the head of its lane.
    pub(crate) fn release_outstanding(&self) -> usize {
        let records = self.tracker.take_all();
        let count = records.len();
        for record in records {
            self.apply(record, Disposition::Release);
        }
        count
    }

    fn apply(&self, record: DeliveryRecord, disposition: Disposition) {
        let DeliveryRecord {
            message_id,
            lane,
            attempt,
            ..
        } = record;

        let reason = match disposition {
            Disposition::Ack => {
                self.state.lock().resolve(&lane, &message_id, Resolution::Ack);
                SubscriptionStats::bump(&self.stats.messages_acked);
                self.notify.notify_one();
                return;
            }
            Disposition::Release => {
                self.state.lock().resolve(&lane, &message_id, Resolution::Nack);
                self.notify.notify_one();
                return;
            }
            Disposition::Nack => {
                SubscriptionStats::bump(&self.stats.messages_nacked);
                FailureReason::Nacked
            }
            Disposition::Timeout => {
                SubscriptionStats::bump(&self.stats.messages_expired);
                FailureReason::DeadlineExceeded
            }
        };

        let exhausted = self
            .metadata
            .dead_letter_policy
            .as_ref()
            .is_some_and(|policy| attempt >= policy.max_delivery_attempts);

        let dropped = {
            let mut state = self.state.lock();
            if exhausted {
                state.drop_in_flight(&lane, &message_id)
            } else {
                state.resolve(&lane, &message_id, Resolution::Nack);
                None
            }
        };
        self.notify.notify_one();

        if let Some(message) = dropped {
            SubscriptionStats::bump(&self.stats.messages_dead_lettered);
            self.dead_letter(message, reason);
        }
    }

    fn dead_letter(&self, message: Message, reason: FailureReason) {
        let dead_letter_topic = self
            .metadata
            .dead_letter_policy
            .as_ref()
            .and_then(|policy| policy.dead_letter_topic.clone());
        let letter = DeadLetter {
            subscription: self.metadata.name.clone(),
            message,
            reason,
            dead_letter_topic,
        };

        match self.dead_letter_sink.upgrade() {
            Some(sink) => sink.dead_letter(letter),
            None => warn!(
                target: "seqmq::subscription",
                subscription = %self.metadata.name,
                message_id = %letter.message.id,
                "dead-letter sink is gone, dropping message"
            ),
        }
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }

    /// Claims the single subscriber slot.
    pub(crate) fn try_attach(&self) -> bool {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SubscriptionStatsSnapshot {
        let (backlog, outstanding) = {
            let state = self.state.lock();
            (state.backlog(), state.outstanding())
        };
        self.stats.snapshot(backlog, outstanding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::message::PublishRequest;

    #[derive(Debug, Default)]
    struct CollectingSink {
        letters: Mutex<Vec<DeadLetter>>,
    }

    impl DeadLetterSink for CollectingSink {
        fn dead_letter(&self, letter: DeadLetter) {
            self.letters.lock().push(letter);
        }
    }

    fn subscription(
        clock: Arc<ManualClock>,
        sink: &Arc<CollectingSink>,
        policy: Option<DeadLetterPolicy>,
    ) -> Subscription {
        let metadata = SubscriptionMetadata {
            name: "sub".into(),
            topic: "topic".into(),
            ack_deadline_seconds: 1,
            enable_message_ordering: true,
            dead_letter_policy: policy,
        };
        let sink: Arc<dyn DeadLetterSink> = sink.clone();
        Subscription::new(metadata, clock, Arc::downgrade(&sink))
    }

    fn ack_id(d: &Dispatch) -> AckId {
        d.message.ack_id().cloned().unwrap()
    }

    fn msg(id: &str) -> Message {
        PublishRequest::new(id.to_string())
            .with_ordering_key("k")
            .into_message(MessageId::from(id))
    }

    #[test]
    fn timeout_redelivers_with_next_attempt() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let sub = subscription(clock.clone(), &sink, None);
        sub.enqueue(msg("m1"));

        let first = sub.dispatch_next(10).unwrap();
        assert_eq!(first.message.attempt, 1);
        assert_eq!(sub.expire_overdue(), 0);

        clock.advance(Duration::from_millis(1500));
        assert_eq!(sub.expire_overdue(), 1);

        let second = sub.dispatch_next(10).unwrap();
        assert_eq!(second.message.id.as_str(), "m1");
        assert_eq!(second.message.attempt, 2);

        // the reply to the first delivery arrives late
        let late = sub.settle(&first.message.id, Some(first.tag), Disposition::Ack);
        assert_eq!(late, Settlement::Stale);
        assert_eq!(sub.stats().outstanding, 1);
    }

    #[test]
    fn ack_for_expired_attempt_does_not_settle_redelivery() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let sub = subscription(clock.clone(), &sink, None);
        sub.enqueue(msg("m1"));

        let first = sub.dispatch_next(10).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(sub.expire_overdue(), 1);
        let second = sub.dispatch_next(10).unwrap();
        assert_ne!(ack_id(&first), ack_id(&second));

        assert_eq!(sub.ack(&ack_id(&first)), Settlement::Stale);
        assert_eq!(sub.stats().outstanding, 1);
        assert_eq!(sub.ack(&ack_id(&second)), Settlement::Applied);
        assert_eq!(sub.stats().outstanding, 0);
    }

    #[test]
    fn duplicate_ack_is_stale() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let sub = subscription(clock, &sink, None);
        sub.enqueue(msg("m1"));
        let d = sub.dispatch_next(10).unwrap();

        assert_eq!(sub.ack(&ack_id(&d)), Settlement::Applied);
        assert_eq!(sub.ack(&ack_id(&d)), Settlement::Stale);
        assert_eq!(sub.nack(&ack_id(&d)), Settlement::Stale);
        let stats = sub.stats();
        assert_eq!(stats.messages_acked, 1);
        assert_eq!(stats.stale_settlements, 2);
    }

    #[test]
    fn exhausted_message_is_dead_lettered_and_key_advances() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let policy = DeadLetterPolicy::new(2).with_topic("dlq");
        let sub = subscription(clock, &sink, Some(policy));
        sub.enqueue(msg("m1"));
        sub.enqueue(msg("m2"));

        let d = sub.dispatch_next(10).unwrap();
        sub.nack(&ack_id(&d));
        let d = sub.dispatch_next(10).unwrap();
        assert_eq!(d.message.attempt, 2);
        sub.nack(&ack_id(&d));

        let next = sub.dispatch_next(10).unwrap();
        assert_eq!(next.message.id.as_str(), "m2");

        let letters = sink.letters.lock();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].message.id.as_str(), "m1");
        assert_eq!(letters[0].reason, FailureReason::Nacked);
        assert_eq!(letters[0].dead_letter_topic.as_deref(), Some("dlq"));
    }

    #[test]
    fn flow_control_caps_outstanding() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let metadata = SubscriptionMetadata {
            name: "unordered".into(),
            topic: "topic".into(),
            ack_deadline_seconds: 10,
            enable_message_ordering: false,
            dead_letter_policy: None,
        };
        let sink_dyn: Arc<dyn DeadLetterSink> = sink.clone();
        let sub = Subscription::new(metadata, clock, Arc::downgrade(&sink_dyn));
        for i in 0..5 {
            sub.enqueue(msg(&i.to_string()));
        }

        assert!(sub.dispatch_next(2).is_some());
        let second = sub.dispatch_next(2).unwrap();
        assert!(sub.dispatch_next(2).is_none());

        sub.ack(&ack_id(&second));
        assert!(sub.dispatch_next(2).is_some());
    }

    #[test]
    fn zero_deadline_extension_nacks() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let sub = subscription(clock, &sink, None);
        sub.enqueue(msg("m1"));
        let d = sub.dispatch_next(10).unwrap();

        assert_eq!(sub.modify_ack_deadline(&ack_id(&d), 0).unwrap(), Settlement::Applied);
        let again = sub.dispatch_next(10).unwrap();
        assert_eq!(again.message.attempt, 2);
        assert!(sub.modify_ack_deadline(&ack_id(&again), 601).is_err());
        assert_eq!(sub.modify_ack_deadline(&ack_id(&d), 30).unwrap(), Settlement::Stale);
    }

    #[test]
    fn release_requeues_without_failure_counts() {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(CollectingSink::default());
        let sub = subscription(clock, &sink, Some(DeadLetterPolicy::new(1)));
        sub.enqueue(msg("m1"));
        sub.dispatch_next(10).unwrap();

        assert_eq!(sub.release_outstanding(), 1);
        let stats = sub.stats();
        assert_eq!(stats.messages_nacked, 0);
        assert_eq!(stats.messages_dead_lettered, 0);
        assert_eq!(stats.backlog, 1);
        assert!(sink.letters.lock().is_empty());
    }
}
