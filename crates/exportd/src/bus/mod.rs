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

//! Topic-routed publish/subscribe abstraction.
//!
//! Services only talk to each other through a [`MessageBus`]: publishers send
//! a body to an exchange under a routing key, and consumers read a named
//! queue that is bound to the exchange with a topic pattern (see
//! [`crate::routing`] for the grammar).
//!
//! Delivery is at-least-once. A consumer must [`Delivery::ack`] each message
//! once it is done with it, or [`Delivery::nack`] it with `requeue = true` to
//! have it redelivered.
//!
//! Two backends are provided:
//!
//! - [`InMemoryBus`]: a single-process exchange used by tests and by the
//!   standalone server mode.
//! - `KafkaBus` (feature `kafka`): exchanges map to topics, routing keys to
//!   message keys and queues to consumer groups.

mod memory;

#[cfg(feature = "kafka")]
mod kafka;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{BusBackend, BusConfig};
use crate::error::BusError;
use crate::routing::RoutingKey;

pub use memory::{BusStats, InMemoryBus};

#[cfg(feature = "kafka")]
pub use kafka::KafkaBus;

/// A routing key and the raw body that travelled under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Settles a delivery with the backend it came from.
#[async_trait]
pub trait Acker: Send {
    /// Marks the message as processed.
    async fn ack(self: Box<Self>) -> Result<(), BusError>;

    /// Rejects the message, optionally asking for it to be redelivered.
    async fn nack(self: Box<Self>, message: Message, requeue: bool) -> Result<(), BusError>;
}

/// A message handed to a consumer, together with the means to settle it.
pub struct Delivery {
    message: Message,
    redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(message: Message, redelivered: bool, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            redelivered,
            acker,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.message.routing_key
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }

    /// Whether this message has been handed out before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), BusError> {
        self.acker.nack(self.message, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.message.routing_key)
            .field("body_len", &self.message.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next delivery. `None` means the subscription is closed.
    async fn next(&mut self) -> Option<Result<Delivery, BusError>>;
}

/// Publish/subscribe fabric with topic exchanges.
///
/// Implementations serialize concurrent publishes themselves, so a single
/// `Arc<dyn MessageBus>` can be shared by every task in a process.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declares a durable topic exchange. Declaring an existing exchange is a
    /// no-op.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BusError>;

    /// Publishes `body` to `exchange` under `routing_key`.
    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>)
        -> Result<(), BusError>;

    /// Consumes `queue`, bound to `exchange` with the topic pattern `binding`.
    async fn subscribe(
        &self,
        exchange: &str,
        queue: &str,
        binding: &str,
    ) -> Result<Box<dyn Subscription>, BusError>;
}

/// Serializes `message` as JSON and publishes it under `key`.
pub async fn publish_json<T>(
    bus: &dyn MessageBus,
    exchange: &str,
    key: &RoutingKey,
    message: &T,
) -> Result<(), BusError>
where
    T: Serialize + Sync + ?Sized,
{
    let body = serde_json::to_vec(message)?;
    bus.publish(exchange, &key.to_string(), body).await
}

/// Builds the bus selected by `config`.
///
/// # Errors
///
/// Fails if the Kafka backend is requested but this build lacks the `kafka`
/// feature, or if the Kafka clients cannot be created.
pub fn connect(config: &BusConfig) -> Result<Arc<dyn MessageBus>, BusError> {
    match config.backend {
        BusBackend::Memory => Ok(Arc::new(InMemoryBus::new())),
        #[cfg(feature = "kafka")]
        BusBackend::Kafka => Ok(Arc::new(KafkaBus::connect(config)?)),
        #[cfg(not(feature = "kafka"))]
        BusBackend::Kafka => Err(BusError::Backend(
            "this build does not include the kafka backend (enable the `kafka` feature)".into(),
        )),
    }
}
