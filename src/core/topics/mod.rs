//! Topic registry and per-topic fan-out.

pub mod registry;
pub mod topic;

pub use registry::TopicRegistry;
pub use topic::{Topic, TopicName};
