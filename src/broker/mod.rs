//! # Broker Module
//!
//! The top-level [`Broker`] ties the topic registry, the publisher and the
//! subscriptions together and owns subscriber lifecycles.
//!
//! - `engine`: the broker facade (admin, publish, subscribe, settle).

pub mod engine;

pub use self::engine::Broker;
