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

//! Completion router behaviour against a running router service.

use std::sync::Arc;
use std::time::Duration;

use exportd::routing::{
    ADDRESSED_COMPLETION_BINDING, ADDRESSED_COMPLETION_EXCHANGE, RAW_COMPLETION_EXCHANGE,
};
use exportd::{CompletionRecord, InMemoryBus, MessageBus, Subscription};
use exportd_server::services;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{local_listener, test_config, wait_for_ping};

struct RunningRouter {
    bus: Arc<InMemoryBus>,
    addressed: Box<dyn Subscription>,
    shutdown: CancellationToken,
}

async fn start_router() -> RunningRouter {
    let output = tempfile::tempdir().unwrap();
    let config = test_config(output.path());
    let bus = Arc::new(InMemoryBus::new());
    let shutdown = CancellationToken::new();

    let (listener, url) = local_listener().await;
    {
        let bus: Arc<dyn MessageBus> = bus.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { services::serve_router(listener, &config, bus, shutdown).await });
    }
    wait_for_ping(&url).await;

    let addressed = bus
        .subscribe(
            ADDRESSED_COMPLETION_EXCHANGE,
            "api-gateway",
            ADDRESSED_COMPLETION_BINDING,
        )
        .await
        .unwrap();

    RunningRouter {
        bus,
        addressed,
        shutdown,
    }
}

async fn publish_raw(bus: &InMemoryBus, key: &str, body: Vec<u8>) {
    bus.publish(RAW_COMPLETION_EXCHANGE, key, body).await.unwrap();
}

async fn next_addressed(sub: &mut Box<dyn Subscription>) -> (String, CompletionRecord) {
    let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("no addressed completion")
        .expect("subscription closed")
        .expect("delivery error");
    let key = delivery.routing_key().to_string();
    let record = serde_json::from_slice(delivery.body()).unwrap();
    delivery.ack().await.unwrap();
    (key, record)
}

#[tokio::test]
async fn test_routing_fidelity() {
    let mut router = start_router().await;

    let raw = CompletionRecord::new(
        "ABC123",
        "/csvfiles/ABC123--1700000000-1700000001.csv",
        1_700_000_000,
    );
    publish_raw(
        &router.bus,
        "csv.ABC123.1700000000",
        serde_json::to_vec(&raw).unwrap(),
    )
    .await;

    let (key, addressed) = next_addressed(&mut router.addressed).await;
    assert_eq!(key, "req.ABC123");
    assert_eq!(addressed.id, "ABC123");
    assert_eq!(addressed.file_path, raw.file_path);

    router.shutdown.cancel();
}

#[tokio::test]
async fn test_malformed_key_does_not_stop_routing() {
    let mut router = start_router().await;
    let record = CompletionRecord::new("GOOD", "/csvfiles/good.csv", 7);

    publish_raw(
        &router.bus,
        "csv.only-two.parts",
        serde_json::to_vec(&record).unwrap(),
    )
    .await;
    publish_raw(&router.bus, "csv.BAD.7", b"not json".to_vec()).await;
    publish_raw(&router.bus, "csv.GOOD.7", serde_json::to_vec(&record).unwrap()).await;

    let (key, addressed) = next_addressed(&mut router.addressed).await;
    assert_eq!(key, "req.GOOD");
    assert_eq!(addressed.file_path, "/csvfiles/good.csv");

    let extra = tokio::time::timeout(Duration::from_millis(200), router.addressed.next()).await;
    assert!(extra.is_err(), "malformed messages must not be forwarded");

    router.shutdown.cancel();
}
