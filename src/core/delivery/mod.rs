//! Message delivery to consumer handlers.

pub mod handle;
pub mod handler;
pub(crate) mod scheduler;

pub use handle::{ShutdownMode, SubscriberId, SubscriptionHandle};
pub use handler::{AckReply, FlowControl, MessageHandler};
