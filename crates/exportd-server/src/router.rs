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

//! Completion router.
//!
//! Consumes raw completions (`csv.<id>.<ts>`) from the worker's exchange and
//! re-publishes each one on the addressed exchange as `req.<id>`, which is
//! the only key shape the gateway listens for. The record keeps its file
//! path and gets a fresh timestamp.
//!
//! A raw message is acknowledged only after its addressed copy has been
//! published. If publishing fails it is requeued, so a completion is
//! delivered at least once; malformed messages are acknowledged and dropped.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use exportd::bus::{publish_json, Delivery};
use exportd::routing::{
    ADDRESSED_COMPLETION_EXCHANGE, RAW_COMPLETION_BINDING, RAW_COMPLETION_EXCHANGE,
};
use exportd::{
    AddressedCompletion, BusError, CompletionRecord, MalformedMessage, MessageBus, RoutingKey,
    Subscription,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Backoff after a requeue so a failing publish does not spin.
const REQUEUE_DELAY: Duration = Duration::from_millis(250);

/// What happened to one raw completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Re-published as `req.<id>` and acknowledged.
    Forwarded(String),
    /// Malformed; acknowledged and discarded.
    Dropped,
    /// Publishing failed; handed back to the bus for redelivery.
    Requeued,
}

pub struct CompletionRouter {
    bus: Arc<dyn MessageBus>,
    queue: String,
}

impl CompletionRouter {
    pub fn new(bus: Arc<dyn MessageBus>, queue: impl Into<String>) -> Self {
        Self {
            bus,
            queue: queue.into(),
        }
    }

    /// Declares both exchanges and binds the router queue to `csv.#.#`.
    pub async fn subscribe(&self) -> Result<Box<dyn Subscription>, BusError> {
        self.bus.declare_exchange(RAW_COMPLETION_EXCHANGE).await?;
        self.bus
            .declare_exchange(ADDRESSED_COMPLETION_EXCHANGE)
            .await?;
        let subscription = self
            .bus
            .subscribe(RAW_COMPLETION_EXCHANGE, &self.queue, RAW_COMPLETION_BINDING)
            .await?;
        info!(queue = %self.queue, binding = RAW_COMPLETION_BINDING, "Routing raw completions");
        Ok(subscription)
    }

    pub async fn handle(&self, delivery: Delivery) -> RouteOutcome {
        let (key, raw) = match decode(&delivery) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key(), error = %e, "Dropping malformed raw completion");
                record_outcome("dropped");
                settle(delivery.ack().await);
                return RouteOutcome::Dropped;
            }
        };

        let id = key.id().to_string();
        if raw.id != id {
            debug!(key_id = %id, body_id = %raw.id, "Raw completion body id differs from key, using key");
        }

        let addressed: AddressedCompletion = raw.readdressed(id.as_str());
        let target = RoutingKey::addressed(id.as_str());
        match publish_json(
            self.bus.as_ref(),
            ADDRESSED_COMPLETION_EXCHANGE,
            &target,
            &addressed,
        )
        .await
        {
            Ok(()) => {
                debug!(request_id = %id, from = %key, to = %target, "Completion forwarded");
                record_outcome("forwarded");
                settle(delivery.ack().await);
                RouteOutcome::Forwarded(id)
            }
            Err(e) => {
                warn!(request_id = %id, error = %e, "Failed to forward completion, requeueing");
                record_outcome("requeued");
                settle(delivery.nack(true).await);
                RouteOutcome::Requeued
            }
        }
    }

    pub async fn consume(&self, mut subscription: Box<dyn Subscription>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Completion router shutting down");
                    break;
                }
                next = subscription.next() => match next {
                    Some(Ok(delivery)) => {
                        if self.handle(delivery).await == RouteOutcome::Requeued {
                            tokio::time::sleep(REQUEUE_DELAY).await;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to receive raw completion");
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    }
                    None => {
                        warn!(queue = %self.queue, "Raw completion subscription closed");
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

/// Health endpoint for the router process.
pub fn app() -> Router {
    Router::new()
        .route("/ping", get(crate::ping))
        .layer(TraceLayer::new_for_http())
}

fn decode(delivery: &Delivery) -> Result<(RoutingKey, CompletionRecord), MalformedMessage> {
    let key = RoutingKey::parse_raw(delivery.routing_key())?;
    let record = serde_json::from_slice(delivery.body())?;
    Ok((key, record))
}

fn settle(result: Result<(), BusError>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to settle raw completion");
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("exportd_router_completions_total", "outcome" => outcome).increment(1);
}
