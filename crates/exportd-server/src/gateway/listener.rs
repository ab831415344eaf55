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

//! Gateway side of the completion channel.
//!
//! The listener owns the gateway's queue on the addressed exchange and feeds
//! every well-formed completion into the correlation store, where the parked
//! HTTP handler picks it up.

use std::sync::Arc;
use std::time::Duration;

use exportd::bus::Delivery;
use exportd::routing::{ADDRESSED_COMPLETION_BINDING, ADDRESSED_COMPLETION_EXCHANGE};
use exportd::{
    BusError, CompletionRecord, CorrelationStore, MalformedMessage, MessageBus, RoutingKey,
    Subscription,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed receive before asking the bus again.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What happened to one addressed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// Handed to the correlation store under this id.
    Stored(String),
    /// Malformed; acknowledged and discarded.
    Dropped,
}

pub struct CompletionListener {
    bus: Arc<dyn MessageBus>,
    store: Arc<CorrelationStore>,
    queue: String,
}

impl CompletionListener {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<CorrelationStore>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            store,
            queue: queue.into(),
        }
    }

    /// Declares the addressed exchange and binds the gateway queue to `req.#`.
    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>, BusError> {
        self.bus
            .declare_exchange(ADDRESSED_COMPLETION_EXCHANGE)
            .await?;
        let subscription = self
            .bus
            .subscribe(
                ADDRESSED_COMPLETION_EXCHANGE,
                &self.queue,
                ADDRESSED_COMPLETION_BINDING,
            )
            .await?;
        info!(queue = %self.queue, binding = ADDRESSED_COMPLETION_BINDING, "Listening for addressed completions");
        Ok(subscription)
    }

    /// Validates one delivery, stores it if well-formed, and acknowledges it
    /// either way.
    pub async fn handle(&self, delivery: Delivery) -> ListenOutcome {
        let outcome = match decode(&delivery) {
            Ok(record) => {
                let id = record.id.clone();
                debug!(request_id = %id, file_path = %record.file_path, "Completion received");
                self.store.publish(record);
                ListenOutcome::Stored(id)
            }
            Err(e) => {
                warn!(routing_key = %delivery.routing_key(), error = %e, "Dropping malformed completion");
                metrics::counter!("exportd_gateway_completions_dropped_total").increment(1);
                ListenOutcome::Dropped
            }
        };

        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge completion");
        }
        outcome
    }

    /// Handles deliveries from `subscription` until `shutdown` fires or the
    /// subscription closes.
    pub async fn consume(&self, mut subscription: Box<dyn Subscription>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Completion listener shutting down");
                    break;
                }
                next = subscription.next() => match next {
                    Some(Ok(delivery)) => {
                        self.handle(delivery).await;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to receive completion");
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    }
                    None => {
                        warn!(queue = %self.queue, "Completion subscription closed");
                        break;
                    }
                }
            }
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BusError> {
        let subscription = self.subscribe().await?;
        self.consume(subscription, shutdown).await;
        Ok(())
    }
}

fn decode(delivery: &Delivery) -> Result<CompletionRecord, MalformedMessage> {
    let key = RoutingKey::parse_addressed(delivery.routing_key())?;
    let record: CompletionRecord = serde_json::from_slice(delivery.body())?;
    if record.id != key.id() {
        return Err(MalformedMessage::IdMismatch {
            key_id: key.id().to_string(),
            body_id: record.id,
        });
    }
    Ok(record)
}
