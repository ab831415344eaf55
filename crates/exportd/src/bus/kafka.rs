/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Kafka-backed [`MessageBus`].
//!
//! Kafka has no topic exchanges, so the mapping is:
//!
//! - exchange → topic (created on declare; an existing topic is fine)
//! - routing key → message key
//! - queue → consumer group, so every queue sees every message on the topic
//! - binding pattern → applied on the consumer side; messages that do not
//!   match are committed and skipped
//!
//! Acknowledging commits the message's offset. A requeueing nack seeks the
//! partition back to the message so it is delivered again; a plain nack
//! commits past it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, trace};

use super::{Acker, Delivery, Message, MessageBus, Subscription};
use crate::config::BusConfig;
use crate::error::BusError;
use crate::routing::{bound_key, validate_pattern};

/// [`MessageBus`] over a Kafka cluster.
pub struct KafkaBus {
    brokers: String,
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
    publish_timeout: Duration,
    partitions: i32,
    replication: i32,
}

impl KafkaBus {
    /// Creates the producer and admin clients for `config.brokers`.
    pub fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.publish_timeout_ms.to_string())
            .create()?;
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .create()?;

        info!(brokers = %config.brokers, "Connected Kafka clients");
        Ok(Self {
            brokers: config.brokers.clone(),
            producer,
            admin,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
            partitions: config.topic_partitions,
            replication: config.topic_replication,
        })
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BusError> {
        let topic = NewTopic::new(
            exchange,
            self.partitions,
            TopicReplication::Fixed(self.replication),
        );
        let results = self
            .admin
            .create_topics(&[topic], &AdminOptions::new())
            .await?;

        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, "Topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    trace!(topic = %name, "Topic already exists")
                }
                Err((name, code)) => {
                    return Err(BusError::Backend(format!(
                        "failed to create topic '{}': {}",
                        name, code
                    )))
                }
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BusError> {
        let record = FutureRecord::to(exchange)
            .key(routing_key)
            .payload(body.as_slice());

        self.producer
            .send(record, Timeout::After(self.publish_timeout))
            .await
            .map(|_| ())
            .map_err(|(err, _)| BusError::Kafka(err))
    }

    async fn subscribe(
        &self,
        exchange: &str,
        queue: &str,
        binding: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        validate_pattern(binding)?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", queue)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[exchange])?;

        debug!(topic = %exchange, group = %queue, binding = %binding, "Kafka consumer subscribed");
        Ok(Box::new(KafkaSubscription {
            consumer: Arc::new(consumer),
            binding: binding.to_string(),
        }))
    }
}

struct KafkaSubscription {
    consumer: Arc<StreamConsumer>,
    binding: String,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next(&mut self) -> Option<Result<Delivery, BusError>> {
        loop {
            let msg = match self.consumer.recv().await {
                Ok(msg) => msg,
                Err(err) => return Some(Err(err.into())),
            };

            let position = Position {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
            };
            let Some(routing_key) = bound_key(&self.binding, msg.key()) else {
                trace!(offset = position.offset, "Skipping message outside binding");
                if let Err(err) = position.commit(&self.consumer) {
                    return Some(Err(err));
                }
                continue;
            };

            let message = Message {
                routing_key,
                body: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            };
            let acker = KafkaAcker {
                consumer: Arc::clone(&self.consumer),
                position,
            };
            return Some(Ok(Delivery::new(message, false, Box::new(acker))));
        }
    }
}

struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Position {
    /// Where the group resumes once this message is settled.
    fn next_offset(&self) -> Offset {
        Offset::Offset(self.offset + 1)
    }

    /// Where to seek so this message is read again.
    fn redelivery_offset(&self) -> Offset {
        Offset::Offset(self.offset)
    }

    fn commit(&self, consumer: &StreamConsumer) -> Result<(), BusError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&self.topic, self.partition, self.next_offset())?;
        consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

struct KafkaAcker {
    consumer: Arc<StreamConsumer>,
    position: Position,
}

#[async_trait]
impl Acker for KafkaAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.position.commit(&self.consumer)
    }

    async fn nack(self: Box<Self>, _message: Message, requeue: bool) -> Result<(), BusError> {
        if !requeue {
            return self.position.commit(&self.consumer);
        }

        self.consumer.seek(
            &self.position.topic,
            self.position.partition,
            self.position.redelivery_offset(),
            Timeout::After(Duration::from_secs(5)),
        )?;
        Ok(())
    }
}
