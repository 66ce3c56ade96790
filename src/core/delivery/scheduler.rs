use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::core::delivery::handle::{ShutdownMode, SubscriberId};
use crate::core::delivery::handler::{FlowControl, MessageHandler};
use crate::core::subscription::Subscription;

/// Per-subscriber dispatch loop.
///
/// Wakes on the subscription's `Notify` (publish, settlement, deletion),
/// hands every dispatchable head to the handler on its own task, and on a
/// fixed interval turns expired ack deadlines into redeliveries.
pub(crate) struct DeliveryScheduler {
    pub subscriber_id: SubscriberId,
    pub subscription: Arc<Subscription>,
    pub handler: Arc<dyn MessageHandler>,
    pub flow_control: FlowControl,
    pub ack_check_interval: Duration,
    pub drain_timeout: Duration,
    pub shutdown: watch::Receiver<ShutdownMode>,
}

impl DeliveryScheduler {
    pub async fn run(mut self) {
        let subscription = Arc::clone(&self.subscription);
        info!(
            target: "seqmq::scheduler",
            subscriber = %self.subscriber_id,
            subscription = %subscription.name(),
            "subscriber attached"
        );

        let mut inflight: JoinSet<()> = JoinSet::new();
        let mut reaper = time::interval(self.ack_check_interval);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mode = loop {
            if subscription.is_deleted() {
                break ShutdownMode::Abandon;
            }
            self.dispatch_ready(&mut inflight);

            tokio::select! {
                changed = self.shutdown.changed() => {
                    let mode = match changed {
                        Ok(()) => *self.shutdown.borrow_and_update(),
                        Err(_) => ShutdownMode::Abandon,
                    };
                    if mode != ShutdownMode::Running {
                        break mode;
                    }
                }
                _ = subscription.notified() => {}
                _ = reaper.tick() => {
                    let expired = subscription.expire_overdue();
                    if expired > 0 {
                        debug!(target: "seqmq::scheduler", expired, "requeued expired deliveries");
                    }
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    log_join_error(joined);
                }
            }
        };

        if mode == ShutdownMode::Drain && !inflight.is_empty() {
            let pending = inflight.len();
            let drained = time::timeout(self.drain_timeout, async {
                while let Some(joined) = inflight.join_next().await {
                    log_join_error(joined);
                }
            })
            .await;
            if drained.is_err() {
                warn!(
                    target: "seqmq::scheduler",
                    subscription = %subscription.name(),
                    pending,
                    remaining = inflight.len(),
                    "drain timed out, abandoning remaining handlers"
                );
            }
        }

        inflight.abort_all();
        while inflight.join_next().await.is_some() {}

        let released = subscription.release_outstanding();
        subscription.detach();
        info!(
            target: "seqmq::scheduler",
            subscriber = %self.subscriber_id,
            subscription = %subscription.name(),
            ?mode,
            released,
            "subscriber detached"
        );
    }

    fn dispatch_ready(&self, inflight: &mut JoinSet<()>) {
        let max_outstanding = self.flow_control.max_outstanding_messages;
        while let Some(dispatch) = self.subscription.dispatch_next(max_outstanding) {
            let subscription = Arc::clone(&self.subscription);
            let handler = Arc::clone(&self.handler);
            inflight.spawn(async move {
                let id = dispatch.message.id.clone();
                let reply = handler.handle(dispatch.message).await;
                subscription.settle(&id, Some(dispatch.tag), reply.into());
            });
        }
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!(
                target: "seqmq::scheduler",
                error = %e,
                "message handler panicked; the delivery will expire and be redelivered"
            );
        }
    }
}
