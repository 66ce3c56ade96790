use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::core::clock::{Clock, TokioClock};
use crate::core::delivery::scheduler::DeliveryScheduler;
use crate::core::delivery::{
    FlowControl, MessageHandler, ShutdownMode, SubscriberId, SubscriptionHandle,
};
use crate::core::dlq::DeadLetterSink;
use crate::core::error::{ResourceKind, Result, SeqError};
use crate::core::message::{MessageId, PublishRequest};
use crate::core::publisher::Publisher;
use crate::core::subscription::{
    AckId, Settlement, Subscription, SubscriptionMetadata, SubscriptionOptions,
    SubscriptionStatsSnapshot,
};
use crate::core::topics::{Topic, TopicName, TopicRegistry};

const MAX_NAME_LEN: usize = 255;

/// In-process ordered-delivery broker.
///
/// Construct one explicitly and share it by reference (or `Arc`); there is
/// no process-wide instance. Every call is safe to make concurrently.
#[derive(Debug)]
pub struct Broker {
    config: Config,
    clock: Arc<dyn Clock>,
    topics: Arc<TopicRegistry>,
    subscriptions: DashMap<String, Arc<Subscription>>,
    publisher: Arc<Publisher>,
}

impl Broker {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Builds a broker reading ack deadlines from `clock`.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let topics = Arc::new(TopicRegistry::new());
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&topics),
            config.publisher_config(),
        ));
        Self {
            config,
            clock,
            topics,
            subscriptions: DashMap::new(),
            publisher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ───────────────────────────────────────────────────────────
    // Topics
    // ───────────────────────────────────────────────────────────

    pub fn create_topic(&self, name: &str) -> Result<()> {
        validate_name(ResourceKind::Topic, name)?;
        self.topics.create_topic(name)?;
        info!(target: "seqmq::broker", topic = %name, "topic created");
        Ok(())
    }

    pub fn get_topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.topics
            .get_topic(name)
            .ok_or_else(|| SeqError::topic_not_found(name))
    }

    pub fn topic_exists(&self, name: &str) -> bool {
        self.topics.get_topic(name).is_some()
    }

    pub fn list_topics(&self) -> Vec<TopicName> {
        self.topics.list_topics()
    }

    /// Removes a topic. Its subscriptions stay readable and keep their
    /// backlog, but receive no further messages.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        let topic = self
            .topics
            .remove_topic(name)
            .ok_or_else(|| SeqError::topic_not_found(name))?;
        topic.close();
        info!(
            target: "seqmq::broker",
            topic = %name,
            detached = ?topic.subscription_names(),
            "topic deleted"
        );
        Ok(())
    }

    // ───────────────────────────────────────────────────────────
    // Publishing
    // ───────────────────────────────────────────────────────────

    /// Publishes `payload` to `topic`, optionally under an ordering key.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        ordering_key: Option<&str>,
    ) -> Result<MessageId> {
        let mut request = PublishRequest::new(payload);
        if let Some(key) = ordering_key {
            request = request.with_ordering_key(key);
        }
        self.publisher.publish(topic, request)
    }

    pub fn publish_message(&self, topic: &str, request: PublishRequest) -> Result<MessageId> {
        self.publisher.publish(topic, request)
    }

    // ───────────────────────────────────────────────────────────
    // Subscriptions
    // ───────────────────────────────────────────────────────────

    /// Creates a subscription attached to `topic`.
    ///
    /// Concurrent creators of the same name race on one map entry: exactly
    /// one succeeds, the others get `AlreadyExists`.
    pub fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionMetadata> {
        validate_name(ResourceKind::Subscription, name)?;
        options.validate()?;
        if let Some(dlq_topic) = options
            .dead_letter_policy
            .as_ref()
            .and_then(|p| p.dead_letter_topic.as_deref())
        {
            validate_name(ResourceKind::Topic, dlq_topic)?;
        }

        let topic_ref = self
            .topics
            .get_topic(topic)
            .ok_or_else(|| SeqError::topic_not_found(topic))?;

        let metadata = SubscriptionMetadata {
            name: name.to_owned(),
            topic: topic.to_owned(),
            ack_deadline_seconds: options
                .ack_deadline_seconds
                .unwrap_or(self.config.broker.default_ack_deadline_secs),
            enable_message_ordering: options.enable_message_ordering,
            dead_letter_policy: options.dead_letter_policy,
        };

        match self.subscriptions.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(SeqError::AlreadyExists {
                kind: ResourceKind::Subscription,
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                let sink: Arc<dyn DeadLetterSink> = self.publisher.clone();
                let subscription = Arc::new(Subscription::new(
                    metadata.clone(),
                    Arc::clone(&self.clock),
                    Arc::downgrade(&sink),
                ));
                if !topic_ref.attach(Arc::clone(&subscription)) {
                    return Err(SeqError::topic_not_found(topic));
                }
                slot.insert(subscription);
                info!(
                    target: "seqmq::broker",
                    subscription = %name,
                    topic = %topic,
                    ordered = metadata.enable_message_ordering,
                    ack_deadline_secs = metadata.ack_deadline_seconds,
                    "subscription created"
                );
                Ok(metadata)
            }
        }
    }

    pub fn get_subscription(&self, name: &str) -> Result<SubscriptionMetadata> {
        Ok(self.subscription(name)?.metadata().clone())
    }

    /// Creates the subscription, or returns the existing one when another
    /// caller won the race.
    ///
    /// The existing subscription's settings win; `options` only apply when
    /// this call creates it.
    pub fn get_or_create_subscription(
        &self,
        name: &str,
        topic: &str,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionMetadata> {
        match self.create_subscription(name, topic, options) {
            Err(e) if e.is_already_exists() => {
                debug!(target: "seqmq::broker", subscription = %name, "subscription exists, reusing");
                self.get_subscription(name)
            }
            other => other,
        }
    }

    pub fn list_subscriptions(&self) -> Vec<SubscriptionMetadata> {
        let mut all: Vec<SubscriptionMetadata> = self
            .subscriptions
            .iter()
            .map(|entry| entry.value().metadata().clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Deletes a subscription, stopping its subscriber (if any) and
    /// discarding its backlog.
    pub fn delete_subscription(&self, name: &str) -> Result<()> {
        let (_, subscription) = self
            .subscriptions
            .remove(name)
            .ok_or_else(|| SeqError::subscription_not_found(name))?;
        if let Some(topic) = self.topics.get_topic(&subscription.metadata().topic) {
            topic.detach(&subscription);
        }
        subscription.mark_deleted();
        info!(target: "seqmq::broker", subscription = %name, "subscription deleted");
        Ok(())
    }

    fn subscription(&self, name: &str) -> Result<Arc<Subscription>> {
        self.subscriptions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SeqError::subscription_not_found(name))
    }

    // ───────────────────────────────────────────────────────────
    // Consuming
    // ───────────────────────────────────────────────────────────

    /// Attaches `handler` to the subscription with the configured flow
    /// control. See [`MessageHandler`] for the concurrency contract.
    ///
    /// Must be called inside a Tokio runtime; otherwise fails with
    /// `FailedPrecondition`.
    pub fn subscribe<H>(&self, name: &str, handler: H) -> Result<SubscriptionHandle>
    where
        H: MessageHandler,
    {
        self.subscribe_with(name, handler, self.config.flow_control())
    }

    pub fn subscribe_with<H>(
        &self,
        name: &str,
        handler: H,
        flow_control: FlowControl,
    ) -> Result<SubscriptionHandle>
    where
        H: MessageHandler,
    {
        if flow_control.max_outstanding_messages == 0 {
            return Err(SeqError::InvalidArgument(
                "max_outstanding_messages must be at least 1".into(),
            ));
        }
        let runtime = Handle::try_current().map_err(|e| {
            SeqError::FailedPrecondition(format!("subscribe needs a Tokio runtime: {e}"))
        })?;
        let subscription = self.subscription(name)?;
        if !subscription.try_attach() {
            return Err(SeqError::FailedPrecondition(format!(
                "subscription {name} already has an active subscriber"
            )));
        }

        let subscriber_id = SubscriberId::generate();
        let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownMode::Running);
        let scheduler = DeliveryScheduler {
            subscriber_id: subscriber_id.clone(),
            subscription,
            handler: Arc::new(handler),
            flow_control,
            ack_check_interval: self.config.ack_check_interval(),
            drain_timeout: self.config.drain_timeout(),
            shutdown: shutdown_rx,
        };
        let task = runtime.spawn(scheduler.run());

        Ok(SubscriptionHandle::new(
            subscriber_id,
            name.to_owned(),
            shutdown_tx,
            task,
        ))
    }

    /// Acknowledges the delivery identified by `ack_id` (taken from the
    /// delivered [`Message`](crate::Message)).
    ///
    /// Yields `Settlement::Stale` when that delivery is no longer
    /// outstanding: already settled, or past its deadline and redelivered.
    pub fn ack(&self, subscription: &str, ack_id: &AckId) -> Result<Settlement> {
        Ok(self.subscription(subscription)?.ack(ack_id))
    }

    /// Rejects the delivery; the message is redelivered right away, ahead
    /// of any later message with the same ordering key.
    pub fn nack(&self, subscription: &str, ack_id: &AckId) -> Result<Settlement> {
        Ok(self.subscription(subscription)?.nack(ack_id))
    }

    /// Resets the ack deadline of an outstanding delivery to `seconds` from
    /// now; zero is a nack.
    pub fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_id: &AckId,
        seconds: u32,
    ) -> Result<Settlement> {
        self.subscription(subscription)?.modify_ack_deadline(ack_id, seconds)
    }

    pub fn subscription_stats(&self, name: &str) -> Result<SubscriptionStatsSnapshot> {
        Ok(self.subscription(name)?.stats())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

fn validate_name(kind: ResourceKind, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SeqError::InvalidArgument(format!(
            "{kind} name must be 1..={MAX_NAME_LEN} bytes"
        )));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(SeqError::InvalidArgument(format!(
            "{kind} name must not contain whitespace: {name:?}"
        )));
    }
    Ok(())
}
