//! Retained message store.

use std::collections::HashMap;

use crate::topic::topic_matches;
use crate::types::Message;

/// Last retained message per topic.
#[derive(Debug, Default)]
pub struct RetainedStore {
    messages: HashMap<String, Message>,
}

impl RetainedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a retained publish. An empty payload clears the topic.
    pub fn apply(&mut self, msg: &Message) {
        if msg.payload.is_empty() {
            self.messages.remove(&msg.topic);
        } else {
            self.messages.insert(msg.topic.clone(), msg.clone());
        }
    }

    /// Retained messages matching `filter`, in topic order.
    pub fn matching(&self, filter: &str) -> Vec<Message> {
        let mut found: Vec<Message> = self
            .messages
            .values()
            .filter(|m| topic_matches(filter, &m.topic))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.topic.cmp(&b.topic));
        found
    }

    /// Retained message for an exact topic.
    pub fn get(&self, topic: &str) -> Option<&Message> {
        self.messages.get(topic)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
