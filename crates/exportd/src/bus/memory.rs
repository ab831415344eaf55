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

//! Single-process topic exchange.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{Acker, Delivery, Message, MessageBus, Subscription};
use crate::error::BusError;
use crate::routing::{topic_matches, validate_pattern};

/// Counters describing what an [`InMemoryBus`] has done so far.
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    unroutable: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    rejected: AtomicU64,
}

impl BusStats {
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Messages that matched no binding and were discarded.
    pub fn unroutable(&self) -> u64 {
        self.unroutable.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::SeqCst)
    }

    /// Messages nacked without requeue.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

struct QueuedMessage {
    message: Message,
    redelivered: bool,
}

struct Binding {
    pattern: String,
    queue: String,
}

struct Queue {
    sender: mpsc::UnboundedSender<QueuedMessage>,
}

#[derive(Default)]
struct Inner {
    exchanges: HashMap<String, Vec<Binding>>,
    queues: HashMap<String, Queue>,
}

/// In-memory [`MessageBus`] with AMQP-style topic routing.
///
/// Each queue has exactly one consumer and lives as long as its
/// [`Subscription`]; messages routed while no queue matches are discarded,
/// as a broker does with unroutable messages.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Mutex<Inner>>,
    stats: Arc<BusStats>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Closes every queue; open subscriptions drain and then end.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.queues.clear();
        for bindings in inner.exchanges.values_mut() {
            bindings.clear();
        }
    }

    fn remove_queue(&self, queue: &str) {
        let mut inner = self.inner.lock();
        inner.queues.remove(queue);
        for bindings in inner.exchanges.values_mut() {
            bindings.retain(|binding| binding.queue != queue);
        }
        debug!(queue = %queue, "Queue removed");
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock();
        inner.exchanges.entry(exchange.to_string()).or_default();
        debug!(exchange = %exchange, "Exchange declared");
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
    ) -> Result<(), BusError> {
        let inner = self.inner.lock();
        let bindings = inner
            .exchanges
            .get(exchange)
            .ok_or_else(|| BusError::ExchangeNotFound {
                exchange: exchange.to_string(),
            })?;

        // A queue bound more than once still receives one copy
        let targets: HashSet<&str> = bindings
            .iter()
            .filter(|binding| topic_matches(&binding.pattern, routing_key))
            .map(|binding| binding.queue.as_str())
            .collect();

        self.stats.published.fetch_add(1, Ordering::SeqCst);
        if targets.is_empty() {
            self.stats.unroutable.fetch_add(1, Ordering::SeqCst);
            trace!(exchange = %exchange, routing_key = %routing_key, "Unroutable message discarded");
            return Ok(());
        }

        for queue in targets {
            if let Some(queue) = inner.queues.get(queue) {
                let _ = queue.sender.send(QueuedMessage {
                    message: Message {
                        routing_key: routing_key.to_string(),
                        body: body.clone(),
                    },
                    redelivered: false,
                });
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        queue: &str,
        binding: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        validate_pattern(binding)?;

        let mut inner = self.inner.lock();
        if !inner.exchanges.contains_key(exchange) {
            return Err(BusError::ExchangeNotFound {
                exchange: exchange.to_string(),
            });
        }
        if inner.queues.contains_key(queue) {
            return Err(BusError::QueueInUse {
                queue: queue.to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        inner.queues.insert(queue.to_string(), Queue { sender });
        if let Some(bindings) = inner.exchanges.get_mut(exchange) {
            bindings.push(Binding {
                pattern: binding.to_string(),
                queue: queue.to_string(),
            });
        }
        debug!(exchange = %exchange, queue = %queue, binding = %binding, "Queue bound");

        Ok(Box::new(MemorySubscription {
            bus: self.clone(),
            queue: queue.to_string(),
            receiver,
        }))
    }
}

struct MemorySubscription {
    bus: InMemoryBus,
    queue: String,
    receiver: mpsc::UnboundedReceiver<QueuedMessage>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Result<Delivery, BusError>> {
        let queued = self.receiver.recv().await?;

        let acker = MemoryAcker {
            queue: self.bus.inner.lock().queues.get(&self.queue).map(|q| q.sender.clone()),
            stats: Arc::clone(&self.bus.stats),
        };
        Some(Ok(Delivery::new(
            queued.message,
            queued.redelivered,
            Box::new(acker),
        )))
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.bus.remove_queue(&self.queue);
    }
}

struct MemoryAcker {
    queue: Option<mpsc::UnboundedSender<QueuedMessage>>,
    stats: Arc<BusStats>,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(self: Box<Self>, message: Message, requeue: bool) -> Result<(), BusError> {
        if !requeue {
            self.stats.rejected.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let sender = self.queue.as_ref().ok_or(BusError::Closed)?;
        sender
            .send(QueuedMessage {
                message,
                redelivered: true,
            })
            .map_err(|_| BusError::Closed)?;
        self.stats.requeued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
