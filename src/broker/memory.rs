//! In-process broker backed by append-only topic logs
//!
//! Each topic is a vector of messages plus a `watch` channel carrying its
//! length, which readers use to wait for new messages without polling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Broker, BrokerError, BrokerMessage, BrokerResult, TopicReader};

struct Topic {
    name: String,
    messages: RwLock<Vec<BrokerMessage>>,
    len_tx: watch::Sender<usize>,
    groups: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl Topic {
    fn new(name: &str) -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            name: name.to_string(),
            messages: RwLock::new(Vec::new()),
            len_tx,
            groups: Mutex::new(HashMap::new()),
        }
    }

    fn len(&self) -> usize {
        self.messages.read().map(|m| m.len()).unwrap_or(0)
    }
}

/// Broker keeping every topic in memory for the life of the process
#[derive(Default)]
pub struct MemoryBroker {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, name: &str) -> BrokerResult<Arc<Topic>> {
        self.topics
            .read()
            .map_err(|_| BrokerError::Unavailable("topic registry poisoned".to_string()))?
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))
    }

    /// Number of messages stored in `topic` (its high-water mark)
    pub fn topic_len(&self, topic: &str) -> BrokerResult<usize> {
        Ok(self.topic(topic)?.len())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ready(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> BrokerResult<bool> {
        let mut topics = self
            .topics
            .write()
            .map_err(|_| BrokerError::Unavailable("topic registry poisoned".to_string()))?;

        if topics.contains_key(topic) {
            trace!("topic {topic} already exists");
            return Ok(false);
        }

        topics.insert(topic.to_string(), Arc::new(Topic::new(topic)));
        debug!("created topic {topic}");
        Ok(true)
    }

    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> BrokerResult<()> {
        let topic = self.topic(topic)?;
        let mut messages = topic
            .messages
            .write()
            .map_err(|_| BrokerError::Unavailable("topic poisoned".to_string()))?;

        let offset = messages.len();
        messages.push(BrokerMessage {
            topic: topic.name.clone(),
            offset,
            key: key.to_string(),
            value,
        });
        topic.len_tx.send_replace(messages.len());

        trace!("published {key} to {} at offset {offset}", topic.name);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> BrokerResult<Box<dyn TopicReader>> {
        let topic = self.topic(topic)?;
        let cursor = {
            let mut groups = topic
                .groups
                .lock()
                .map_err(|_| BrokerError::Unavailable("group registry poisoned".to_string()))?;
            groups
                .entry(group.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .clone()
        };
        let len_rx = topic.len_tx.subscribe();

        Ok(Box::new(MemoryReader {
            topic,
            cursor,
            len_rx,
        }))
    }
}

struct MemoryReader {
    topic: Arc<Topic>,

    /// Cursor shared with every reader of the same group
    cursor: Arc<AtomicUsize>,
    len_rx: watch::Receiver<usize>,
}

impl MemoryReader {
    /// Take the next unclaimed offset for this group, if any
    fn claim(&mut self) -> Option<BrokerMessage> {
        // Mark the current length as seen before reading, so a publish racing
        // with this claim still wakes `changed()`.
        self.len_rx.borrow_and_update();

        let messages = self.topic.messages.read().ok()?;
        let mut offset = self.cursor.load(Ordering::Acquire);
        loop {
            if offset >= messages.len() {
                return None;
            }
            match self.cursor.compare_exchange(
                offset,
                offset + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(messages[offset].clone()),
                Err(current) => offset = current,
            }
        }
    }
}

#[async_trait]
impl TopicReader for MemoryReader {
    async fn next(&mut self, cancel: &CancellationToken) -> Option<BrokerMessage> {
        loop {
            if let Some(message) = self.claim() {
                return Some(message);
            }
            if cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                changed = self.len_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                _ = cancel.cancelled() => {}
            }
        }
    }
}
