use std::future::Future;

use futures::future::BoxFuture;

use crate::core::message::Message;
use crate::core::subscription::Disposition;

/// A consumer's verdict on one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReply {
    Ack,
    Nack,
}

impl From<AckReply> for Disposition {
    fn from(reply: AckReply) -> Self {
        match reply {
            AckReply::Ack => Disposition::Ack,
            AckReply::Nack => Disposition::Nack,
        }
    }
}

/// Consumer callback registered through `Broker::subscribe`.
///
/// # Concurrency
///
/// `handle` is invoked once per delivery on a spawned task. Calls for
/// different ordering keys (and for unkeyed messages) may run concurrently.
/// On an ordered subscription the next message of a key is not delivered
/// until the current one has been settled by its reply, an explicit
/// ack/nack, or its ack deadline.
///
/// Calls for the same key therefore do not overlap, with one exception: a
/// call still running when its ack deadline passes is not cancelled. The
/// message is redelivered (with `attempt + 1`) while that call finishes,
/// so two calls for the key can briefly run at once. The superseded call's
/// reply is ignored. Extend the deadline with `modify_ack_deadline` for
/// long-running work.
///
/// Any `Fn(Message) -> impl Future<Output = AckReply>` closure implements
/// this trait.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message) -> BoxFuture<'static, AckReply>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckReply> + Send + 'static,
{
    fn handle(&self, message: Message) -> BoxFuture<'static, AckReply> {
        Box::pin(self(message))
    }
}

/// Subscriber-side flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    /// Dispatched but unsettled messages allowed at once.
    pub max_outstanding_messages: usize,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            max_outstanding_messages: 1000,
        }
    }
}
