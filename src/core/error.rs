use std::fmt;

use thiserror::Error;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, SeqError>;

/// Kind of named resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Topic,
    Subscription,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Topic => f.write_str("topic"),
            ResourceKind::Subscription => f.write_str("subscription"),
        }
    }
}

/// Errors surfaced synchronously to callers of the broker.
///
/// Delivery timeouts never reach a caller: they are recovered through
/// redelivery. Duplicate or late acks are reported as a stale settlement,
/// not as an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeqError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Reserved. Expired deliveries are redelivered, never reported.
    #[error("ack deadline exceeded for message {0}")]
    DeadlineExceeded(String),

    /// Reserved for failures outside the categories above; the broker
    /// itself does not produce it.
    #[error("unknown: {0}")]
    Unknown(String),
}

impl SeqError {
    pub fn topic_not_found(name: impl Into<String>) -> Self {
        SeqError::NotFound {
            kind: ResourceKind::Topic,
            name: name.into(),
        }
    }

    pub fn subscription_not_found(name: impl Into<String>) -> Self {
        SeqError::NotFound {
            kind: ResourceKind::Subscription,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SeqError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, SeqError::AlreadyExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_resource() {
        assert_eq!(
            SeqError::topic_not_found("orders").to_string(),
            "topic not found: orders"
        );
        let exists = SeqError::AlreadyExists {
            kind: ResourceKind::Subscription,
            name: "billing".into(),
        };
        assert_eq!(exists.to_string(), "subscription already exists: billing");
        assert!(exists.is_already_exists());
        assert!(!exists.is_not_found());
    }

    #[test]
    fn reserved_variants_still_format() {
        assert_eq!(
            SeqError::DeadlineExceeded("42".into()).to_string(),
            "ack deadline exceeded for message 42"
        );
        assert_eq!(SeqError::Unknown("boom".into()).to_string(), "unknown: boom");
    }
}
