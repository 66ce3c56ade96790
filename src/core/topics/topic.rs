use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::message::{IdGenerator, MessageId, PublishRequest};
use crate::core::subscription::Subscription;

/// Alias for a topic name.
pub type TopicName = String;

/// A named fan-out point holding the subscriptions attached to it.
///
/// Publishing assigns the message id and enqueues into every attached
/// subscription inside one critical section, so all subscriptions see
/// messages of a topic in the same order.
#[derive(Debug)]
pub struct Topic {
    name: TopicName,
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    /// Set under the `subscriptions` lock once the topic is deleted.
    closed: AtomicBool,
}

impl Topic {
    pub fn new(name: impl Into<TopicName>) -> Self {
        Self {
            name: name.into(),
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &TopicName {
        &self.name
    }

    /// Attaches a subscription; it receives messages published from now on.
    /// Returns `false` once the topic has been closed.
    pub(crate) fn attach(&self, subscription: Arc<Subscription>) -> bool {
        let mut subs = self.subscriptions.lock();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        subs.push(subscription);
        true
    }

    /// Marks the topic deleted; later `attach` calls are refused.
    pub(crate) fn close(&self) {
        let _subs = self.subscriptions.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detaches this exact subscription instance. Returns `true` if it was
    /// attached; a newer subscription reusing the name is left alone.
    pub(crate) fn detach(&self, subscription: &Arc<Subscription>) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| !Arc::ptr_eq(s, subscription));
        subs.len() != before
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.subscriptions
            .lock()
            .iter()
            .map(|s| s.name().to_owned())
            .collect()
    }

    /// Assigns an id and fans the message out. Returns the id and the number
    /// of subscriptions it reached.
    pub(crate) fn publish(&self, request: PublishRequest, ids: &IdGenerator) -> (MessageId, usize) {
        let subs = self.subscriptions.lock();
        let id = ids.next_id();
        let message = request.into_message(id.clone());
        for sub in subs.iter() {
            sub.enqueue(message.clone());
        }
        (id, subs.len())
    }
}
