use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::dlq::{DeadLetter, DeadLetterSink};
use crate::core::error::{Result, SeqError};
use crate::core::message::{IdGenerator, MessageId, PublishRequest};
use crate::core::topics::TopicRegistry;

/// Publish-time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherConfig {
    pub max_message_size_bytes: usize,
    pub max_ordering_key_bytes: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_message_size_bytes: 10 * 1024 * 1024,
            max_ordering_key_bytes: 1024,
        }
    }
}

/// Validates publish requests, assigns ids and routes messages into every
/// subscription of the target topic.
///
/// - Unknown topics are rejected with `NotFound`.
/// - Publishing never waits for delivery.
#[derive(Debug)]
pub struct Publisher {
    topic_registry: Arc<TopicRegistry>,
    ids: IdGenerator,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(topic_registry: Arc<TopicRegistry>, config: PublisherConfig) -> Self {
        Self {
            topic_registry,
            ids: IdGenerator::new(),
            config,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Publishes to `topic` and returns the assigned message id.
    pub fn publish(&self, topic: &str, request: PublishRequest) -> Result<MessageId> {
        request.validate(
            self.config.max_message_size_bytes,
            self.config.max_ordering_key_bytes,
        )?;

        let Some(topic_ref) = self.topic_registry.get_topic(topic) else {
            warn!(target: "seqmq::publisher", topic = %topic, "topic not found, publish rejected");
            return Err(SeqError::topic_not_found(topic));
        };

        let ordering_key = request.ordering_key.clone();
        let (id, fanout) = topic_ref.publish(request, &self.ids);
        debug!(
            target: "seqmq::publisher",
            topic = %topic,
            message_id = %id,
            ordering_key = ?ordering_key,
            fanout,
            "message published"
        );
        Ok(id)
    }
}

impl DeadLetterSink for Publisher {
    fn dead_letter(&self, letter: DeadLetter) {
        let Some(topic) = letter.dead_letter_topic.as_deref() else {
            warn!(
                target: "seqmq::dlq",
                subscription = %letter.subscription,
                message_id = %letter.message.id,
                attempts = letter.message.attempt,
                reason = %letter.reason,
                "delivery attempts exhausted, dropping message"
            );
            return;
        };

        match self.publish(topic, letter.to_request()) {
            Ok(id) => warn!(
                target: "seqmq::dlq",
                subscription = %letter.subscription,
                message_id = %letter.message.id,
                dead_letter_topic = %topic,
                dead_letter_id = %id,
                attempts = letter.message.attempt,
                reason = %letter.reason,
                "delivery attempts exhausted, message dead-lettered"
            ),
            Err(e) => error!(
                target: "seqmq::dlq",
                subscription = %letter.subscription,
                message_id = %letter.message.id,
                dead_letter_topic = %topic,
                error = %e,
                "failed to dead-letter message, dropping it"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_to_missing_topic_fails() {
        let publisher = Publisher::new(Arc::new(TopicRegistry::new()), PublisherConfig::default());
        let err = publisher.publish("nope", PublishRequest::new("x")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn invalid_request_is_rejected_before_lookup() {
        let registry = Arc::new(TopicRegistry::new());
        registry.create_topic("t").unwrap();
        let publisher = Publisher::new(registry, PublisherConfig::default());
        let err = publisher.publish("t", PublishRequest::new("")).unwrap_err();
        assert!(matches!(err, SeqError::InvalidArgument(_)));
    }

    #[test]
    fn publish_without_subscriptions_still_assigns_ids() {
        let registry = Arc::new(TopicRegistry::new());
        registry.create_topic("t").unwrap();
        let publisher = Publisher::new(registry, PublisherConfig::default());
        let a = publisher.publish("t", PublishRequest::new("a")).unwrap();
        let b = publisher.publish("t", PublishRequest::new("b")).unwrap();
        assert_ne!(a, b);
    }
}
