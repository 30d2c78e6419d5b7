//! Topic registry and dispatcher
//!
//! Handlers are keyed by exact topic. Subscribing again to a topic adds
//! another handler (fan-out); every handler on the topic sees every message.
//! The registry is owned by the coordinator task, so it needs no locking.

use crate::protocol::Payload;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Callback invoked with the decoded payload of a message on its topic
pub type MessageHandlerFn = Arc<dyn Fn(&Payload) + Send + Sync>;

struct TopicEntry {
    handlers: Vec<MessageHandlerFn>,
    messages_dispatched: u64,
}

/// Result of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers that returned normally
    pub completed: usize,
    /// Handlers that panicked (caught and logged)
    pub panicked: usize,
}

/// Registered topics and their handlers
#[derive(Default)]
pub struct TopicRegistry {
    topics: BTreeMap<String, TopicEntry>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handler; returns true if the topic was not registered before
    pub fn add(&mut self, topic: &str, handler: MessageHandlerFn) -> bool {
        match self.topics.get_mut(topic) {
            Some(entry) => {
                entry.handlers.push(handler);
                debug!(
                    topic,
                    handlers = entry.handlers.len(),
                    "Added handler to existing topic"
                );
                false
            }
            None => {
                self.topics.insert(
                    topic.to_string(),
                    TopicEntry {
                        handlers: vec![handler],
                        messages_dispatched: 0,
                    },
                );
                true
            }
        }
    }

    /// Remove a topic and all its handlers; returns false if unknown
    pub fn remove(&mut self, topic: &str) -> bool {
        self.topics.remove(topic).is_some()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Registered topics in sorted order
    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    pub fn handler_counts(&self) -> BTreeMap<String, usize> {
        self.topics
            .iter()
            .map(|(topic, entry)| (topic.clone(), entry.handlers.len()))
            .collect()
    }

    pub fn messages_dispatched(&self, topic: &str) -> u64 {
        self.topics
            .get(topic)
            .map(|entry| entry.messages_dispatched)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }

    /// Run every handler registered for exactly `topic`, in registration order
    ///
    /// A panicking handler is logged and the remaining handlers still run.
    pub fn dispatch(&mut self, topic: &str, payload: &Payload) -> DispatchOutcome {
        let Some(entry) = self.topics.get_mut(topic) else {
            debug!(topic, "No handlers registered for topic");
            return DispatchOutcome::default();
        };
        entry.messages_dispatched += 1;

        let mut outcome = DispatchOutcome::default();
        for (index, handler) in entry.handlers.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => outcome.completed += 1,
                Err(panic) => {
                    outcome.panicked += 1;
                    error!(
                        topic,
                        handler = index,
                        panic = %panic_message(panic.as_ref()),
                        "Message handler panicked"
                    );
                }
            }
        }
        outcome
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
