pub mod clock;
pub mod delivery;
pub mod dlq;
pub mod error;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod subscription;
pub mod topics;
