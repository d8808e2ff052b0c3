//! Kafka-backed broker
//!
//! Topics get one partition with a replication factor of 1. Readers of one
//! group share committed offsets through the cluster, and a group without a
//! committed offset starts at the earliest message.
//!
//! After cancellation a reader keeps consuming until its position reaches the
//! high watermark of every assigned partition, or until nothing arrives within
//! the client timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::Offset;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use super::{Broker, BrokerError, BrokerMessage, BrokerResult, TopicReader};

fn unavailable(err: KafkaError) -> BrokerError {
    BrokerError::Unavailable(err.to_string())
}

fn client_config(brokers: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", brokers);
    config
}

/// Producer and admin clients for one cluster
pub struct KafkaBroker {
    brokers: String,
    timeout: Duration,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
}

impl KafkaBroker {
    /// Clients for the comma-separated `brokers` list.
    ///
    /// Nothing connects until the first request; `timeout` bounds every
    /// metadata, admin and delivery call.
    pub fn new(brokers: &str, timeout: Duration) -> BrokerResult<Self> {
        let producer: FutureProducer = client_config(brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("linger.ms", "10")
            .create()
            .map_err(unavailable)?;
        let admin: AdminClient<DefaultClientContext> =
            client_config(brokers).create().map_err(unavailable)?;

        Ok(Self {
            brokers: brokers.to_string(),
            timeout,
            producer,
            admin,
        })
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = client_config(&self.brokers);
        config
            .set("group.id", group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false");
        config
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    #[instrument(skip(self), fields(brokers = %self.brokers))]
    async fn ready(&self) -> BrokerResult<()> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        let brokers = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::Unavailable(e.to_string()))?
        .map_err(unavailable)?;

        debug!("cluster metadata lists {brokers} brokers");
        Ok(())
    }

    async fn ensure_topic(&self, topic: &str) -> BrokerResult<bool> {
        let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(1));
        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let results = self
            .admin
            .create_topics([&new_topic], &options)
            .await
            .map_err(unavailable)?;

        match results.into_iter().next() {
            Some(Ok(_)) => {
                debug!("created topic {topic}");
                Ok(true)
            }
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => {
                trace!("topic {topic} already exists");
                Ok(false)
            }
            Some(Err((name, code))) => Err(BrokerError::Unavailable(format!(
                "could not create topic {name}: {code}"
            ))),
            None => Err(BrokerError::Unavailable(format!(
                "no result for creating topic {topic}"
            ))),
        }
    }

    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> BrokerResult<()> {
        let record = FutureRecord::to(topic).key(key).payload(&value);

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                trace!("published {key} to {topic}[{partition}] at offset {offset}");
                Ok(())
            }
            Err((
                KafkaError::MessageProduction(
                    RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic,
                ),
                _,
            )) => Err(BrokerError::UnknownTopic(topic.to_string())),
            Err((e, _)) => Err(unavailable(e)),
        }
    }

    async fn subscribe(&self, topic: &str, group: &str) -> BrokerResult<Box<dyn TopicReader>> {
        let consumer: StreamConsumer = self.consumer_config(group).create().map_err(unavailable)?;
        consumer.subscribe(&[topic]).map_err(unavailable)?;
        debug!("subscribed to {topic} in group {group}");

        Ok(Box::new(KafkaReader {
            consumer: Arc::new(consumer),
            timeout: self.timeout,
        }))
    }
}

fn to_message(message: &BorrowedMessage<'_>) -> BrokerMessage {
    BrokerMessage {
        topic: message.topic().to_string(),
        offset: usize::try_from(message.offset()).unwrap_or_default(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .unwrap_or_default(),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    timeout: Duration,
}

impl KafkaReader {
    /// Whether every assigned partition has been read up to its high watermark
    async fn caught_up(&self) -> bool {
        let consumer = self.consumer.clone();
        let timeout = self.timeout;

        let result = tokio::task::spawn_blocking(move || -> KafkaResult<bool> {
            let assignment = consumer.assignment()?;
            let position = consumer.position()?;
            for partition in assignment.elements() {
                let (low, high) =
                    consumer.fetch_watermarks(partition.topic(), partition.partition(), timeout)?;
                let next = position
                    .find_partition(partition.topic(), partition.partition())
                    .map(|elem| elem.offset());
                let done = match next {
                    Some(Offset::Offset(offset)) => offset >= high,
                    _ => low >= high,
                };
                if !done {
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .await;

        match result {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                warn!("could not read partition watermarks: {e}");
                true
            }
            Err(e) => {
                warn!("watermark lookup task failed: {e}");
                true
            }
        }
    }

    async fn drain_one(&self) -> Option<BrokerMessage> {
        if self.caught_up().await {
            return None;
        }

        match tokio::time::timeout(self.timeout, self.consumer.recv()).await {
            Ok(Ok(message)) => Some(to_message(&message)),
            Ok(Err(e)) => {
                warn!("consumer error while draining: {e}");
                None
            }
            Err(_) => {
                debug!("nothing arrived within {:?} while draining", self.timeout);
                None
            }
        }
    }
}

#[async_trait]
impl TopicReader for KafkaReader {
    async fn next(&mut self, cancel: &CancellationToken) -> Option<BrokerMessage> {
        loop {
            if cancel.is_cancelled() {
                return self.drain_one().await;
            }

            tokio::select! {
                received = self.consumer.recv() => match received {
                    Ok(message) => return Some(to_message(&message)),
                    Err(e) => warn!("consumer error: {e}"),
                },
                _ = cancel.cancelled() => {}
            }
        }
    }
}
