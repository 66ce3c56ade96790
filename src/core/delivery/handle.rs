use std::fmt;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier of one attached subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn generate() -> Self {
        SubscriberId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the scheduler should do with in-flight handlers when it stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Running,
    /// Stop dispatching, let in-flight handlers finish and settle (bounded
    /// by the configured drain timeout), then requeue anything left.
    Drain,
    /// Stop dispatching, cancel in-flight handlers and requeue their
    /// messages at the head of their keys.
    Abandon,
}

/// Cancellation handle returned by `Broker::subscribe`.
///
/// Dropping the handle without calling [`close`](Self::close) or
/// [`abort`](Self::abort) abandons in-flight deliveries.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriberId,
    subscription: String,
    shutdown: watch::Sender<ShutdownMode>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriberId,
        subscription: String,
        shutdown: watch::Sender<ShutdownMode>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            id,
            subscription,
            shutdown,
            task: Some(task),
        }
    }

    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Whether the dispatch loop has stopped, e.g. because the subscription
    /// was deleted.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Graceful stop: drains in-flight handlers so their acks still apply.
    pub async fn close(mut self) {
        self.stop(ShutdownMode::Drain).await;
    }

    /// Immediate stop: in-flight handlers are cancelled and their messages
    /// become deliverable again.
    pub async fn abort(mut self) {
        self.stop(ShutdownMode::Abandon).await;
    }

    async fn stop(&mut self, mode: ShutdownMode) {
        let _ = self.shutdown.send(mode);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!(target: "seqmq::scheduler", error = %e, "dispatch task ended abnormally");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.shutdown.send(ShutdownMode::Abandon);
        }
    }
}
