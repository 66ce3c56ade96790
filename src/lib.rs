//! seqmq – an in-process publish/subscribe broker with per-key ordered,
//! at-least-once delivery.
//!
//! This crate exports
//!  * `core`    – messages, ordering-key queues, subscriptions, delivery
//!  * `broker`  – the [`Broker`] facade tying topics and subscriptions together
//!  * `config`  – TOML-driven runtime configuration
//!  * `logging` – `tracing` subscriber setup
//!
//! ```no_run
//! use seqmq::{AckReply, Broker, Config, Message, SubscriptionOptions};
//!
//! # async fn demo() -> seqmq::Result<()> {
//! let broker = Broker::new(Config::default());
//! broker.create_topic("orders")?;
//! broker.create_subscription("billing", "orders", SubscriptionOptions::ordered())?;
//! broker.publish("orders", "created", Some("customer-7"))?;
//!
//! let handle = broker.subscribe("billing", |msg: Message| async move {
//!     println!("{:?}", msg.payload);
//!     AckReply::Ack
//! })?;
//! handle.close().await;
//! # Ok(())
//! # }
//! ```

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod broker;
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use broker::Broker;
pub use config::{load_config, Config, ConfigError};
pub use core::delivery::{AckReply, FlowControl, MessageHandler, SubscriptionHandle};
pub use core::error::{Result, SeqError};
pub use core::message::{Message, MessageId, PublishRequest};
pub use core::subscription::{
    AckId, DeadLetterPolicy, Settlement, SubscriptionMetadata, SubscriptionOptions,
    SubscriptionStatsSnapshot,
};
