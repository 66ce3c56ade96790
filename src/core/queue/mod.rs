//! Per-key message queues.
//!
//! Every ordering key of a subscription gets its own `OrderingKeyQueue`;
//! messages without a key (or on an unordered subscription) share the
//! subscription's unkeyed lane instead.

pub mod ordering;

pub use ordering::{OrderingKeyQueue, Resolution};
