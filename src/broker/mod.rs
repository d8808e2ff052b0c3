//! Event fan-out through per-family broker topics
//!
//! ## Contract
//!
//! - **Topics** are provisioned idempotently with [`Broker::ensure_topic`]
//! - **Publishing** appends and returns; it never waits for consumers
//! - **Readers** start at the earliest offset, so events published before a
//!   consumer starts are still delivered
//! - **Groups**: readers subscribed with the same group share one cursor, every
//!   message goes to exactly one member of the group
//!
//! Readers stop through cooperative cancellation rather than channel closure:
//! once the token fires, a reader hands out what is left in its topic and then
//! reports the end of the stream.
//!
//! Production runs against Kafka; [`MemoryBroker`] keeps topics in process.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod payload;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BrokerBackend;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;

pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// Publish or subscribe on a topic that was never provisioned
    UnknownTopic(String),

    /// Payload could not be encoded or decoded
    Codec(String),

    /// Broker cannot be reached
    Unavailable(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::UnknownTopic(topic) => write!(f, "topic '{topic}' does not exist"),
            BrokerError::Codec(msg) => write!(f, "payload codec error: {msg}"),
            BrokerError::Unavailable(msg) => write!(f, "broker unavailable: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Codec(err.to_string())
    }
}

/// A message as stored in a topic
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub offset: usize,
    pub key: String,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Succeeds once the broker accepts requests
    async fn ready(&self) -> BrokerResult<()>;

    /// Create the topic if it is missing; returns whether it was created
    async fn ensure_topic(&self, topic: &str) -> BrokerResult<bool>;

    /// Append a keyed message to a topic
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> BrokerResult<()>;

    /// Reader positioned at the earliest offset for `group`
    async fn subscribe(&self, topic: &str, group: &str) -> BrokerResult<Box<dyn TopicReader>>;
}

#[async_trait]
pub trait TopicReader: Send {
    /// Next message for this reader's group.
    ///
    /// Blocks until a message arrives or `cancel` fires. After cancellation the
    /// remaining backlog is still handed out; `None` means the reader is done.
    async fn next(&mut self, cancel: &CancellationToken) -> Option<BrokerMessage>;
}

/// Build the broker `backend` names; `timeout` bounds each broker request
pub fn connect(backend: &BrokerBackend, timeout: Duration) -> BrokerResult<Arc<dyn Broker>> {
    match backend {
        BrokerBackend::Memory => {
            info!("using the in-process broker");
            Ok(Arc::new(MemoryBroker::new()))
        }
        #[cfg(feature = "kafka")]
        BrokerBackend::Kafka(brokers) => {
            info!("using kafka at {brokers}");
            Ok(Arc::new(KafkaBroker::new(brokers, timeout)?))
        }
        #[cfg(not(feature = "kafka"))]
        BrokerBackend::Kafka(brokers) => {
            let _ = timeout;
            Err(BrokerError::Unavailable(format!(
                "built without the kafka feature, cannot reach {brokers}"
            )))
        }
    }
}
