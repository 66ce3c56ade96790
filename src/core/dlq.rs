//! Dead-letter hand-off.
//!
//! A message whose nack or ack deadline lands on its final permitted
//! attempt leaves its ordering key for good and is handed to a
//! [`DeadLetterSink`]. The broker's publisher is the production sink: it
//! republishes the message to the policy's dead-letter topic.

use std::fmt;
use std::fmt::Debug;

use crate::core::message::{Message, PublishRequest};

/// Attribute naming the subscription a dead-lettered message came from.
pub const SOURCE_SUBSCRIPTION_ATTR: &str = "seqmq.dead_letter.source_subscription";
/// Attribute carrying how many deliveries were attempted.
pub const DELIVERY_ATTEMPTS_ATTR: &str = "seqmq.dead_letter.delivery_attempts";

/// Why the final delivery attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Nacked,
    DeadlineExceeded,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Nacked => f.write_str("nacked"),
            FailureReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Message removed from a subscription after its last permitted attempt.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub subscription: String,
    pub message: Message,
    pub reason: FailureReason,
    pub dead_letter_topic: Option<String>,
}

impl DeadLetter {
    /// Publish request for the dead-letter topic.
    ///
    /// Keeps payload, ordering key and attributes, and records where the
    /// message came from.
    pub fn to_request(&self) -> PublishRequest {
        let mut request = PublishRequest {
            payload: self.message.payload.clone(),
            ordering_key: self.message.ordering_key.clone(),
            attributes: self.message.attributes.clone(),
        };
        request
            .attributes
            .insert(SOURCE_SUBSCRIPTION_ATTR.into(), self.subscription.clone());
        request.attributes.insert(
            DELIVERY_ATTEMPTS_ATTR.into(),
            self.message.attempt.to_string(),
        );
        request
    }
}

pub trait DeadLetterSink: Send + Sync + Debug {
    fn dead_letter(&self, letter: DeadLetter);
}
