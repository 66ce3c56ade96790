use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::core::error::{ResourceKind, Result, SeqError};
use crate::core::topics::topic::{Topic, TopicName};

/// [`TopicRegistry`] is a thread-safe store for managing active topics.
///
/// Uses DashMap internally so publishers and admin calls never contend on a
/// single global lock.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: DashMap<TopicName, Arc<Topic>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    /// Creates a topic, failing with `AlreadyExists` if the name is taken.
    pub fn create_topic(&self, name: &str) -> Result<Arc<Topic>> {
        match self.topics.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(SeqError::AlreadyExists {
                kind: ResourceKind::Topic,
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                debug!(target: "seqmq::topics", topic = %name, "creating topic");
                let topic = Arc::new(Topic::new(name));
                slot.insert(Arc::clone(&topic));
                Ok(topic)
            }
        }
    }

    /// Returns `Some(topic)` if found, or `None` if it does not exist.
    pub fn get_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.get(name).map(|entry| Arc::clone(&*entry))
    }

    pub fn list_topics(&self) -> Vec<TopicName> {
        let mut names: Vec<TopicName> = self
            .topics
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Removes a topic by name.
    pub fn remove_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.remove(name).map(|(_, topic)| topic)
    }
}
