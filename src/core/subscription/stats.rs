use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Delivery counters for one subscription.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    pub messages_published: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_acked: AtomicU64,
    pub messages_nacked: AtomicU64,
    pub messages_expired: AtomicU64,
    pub messages_dead_lettered: AtomicU64,
    pub stale_settlements: AtomicU64,
}

/// Serializable snapshot of subscription statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatsSnapshot {
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub messages_acked: u64,
    pub messages_nacked: u64,
    pub messages_expired: u64,
    pub messages_dead_lettered: u64,
    pub stale_settlements: u64,
    /// Messages waiting to be dispatched.
    pub backlog: u64,
    /// Messages dispatched and not yet settled.
    pub outstanding: u64,
}

impl SubscriptionStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, backlog: usize, outstanding: usize) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            messages_nacked: self.messages_nacked.load(Ordering::Relaxed),
            messages_expired: self.messages_expired.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            stale_settlements: self.stale_settlements.load(Ordering::Relaxed),
            backlog: backlog as u64,
            outstanding: outstanding as u64,
        }
    }
}
