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

//! Shutdown lets requests that are already waiting finish.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use exportd::bus::publish_json;
use exportd::routing::ADDRESSED_COMPLETION_EXCHANGE;
use exportd::{CompletionRecord, ExportRequest, InMemoryBus, MessageBus, RoutingKey};
use exportd_server::services;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{local_listener, test_config, wait_for_ping};

#[derive(Clone)]
struct SlowWorker {
    bus: Arc<dyn MessageBus>,
    output: Arc<tempfile::TempDir>,
    received: Arc<Notify>,
}

/// Accepts the request, then writes the file and announces it on the
/// addressed exchange half a second later.
async fn accept_slowly(
    State(worker): State<SlowWorker>,
    Json(request): Json<ExportRequest>,
) -> Json<Value> {
    worker.received.notify_one();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let path = worker.output.path().join(format!("{}.csv", request.id));
        std::fs::write(&path, "a\n1\n").unwrap();
        let record =
            CompletionRecord::new(request.id.as_str(), path.to_string_lossy(), request.timestamp);
        publish_json(
            worker.bus.as_ref(),
            ADDRESSED_COMPLETION_EXCHANGE,
            &RoutingKey::addressed(request.id.as_str()),
            &record,
        )
        .await
        .unwrap();
    });
    Json(json!({"message": "successfully received request"}))
}

#[tokio::test]
async fn test_waiting_export_completes_after_shutdown() {
    let output = tempfile::tempdir().unwrap();
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let worker = SlowWorker {
        bus: bus.clone(),
        output: Arc::new(tempfile::tempdir().unwrap()),
        received: Arc::new(Notify::new()),
    };
    let received = worker.received.clone();

    let workers_down = CancellationToken::new();
    let (worker_listener, worker_url) = local_listener().await;
    let app = Router::new()
        .route("/export", post(accept_slowly))
        .with_state(worker);
    tokio::spawn(exportd_server::serve(worker_listener, app, workers_down.clone()));

    let mut config = test_config(output.path());
    config.gateway.worker_url = worker_url;
    config.gateway.wait_timeout_secs = 3;
    let (gateway_listener, gateway_url) = local_listener().await;
    let shutdown = CancellationToken::new();
    let gateway = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            services::serve_gateway(gateway_listener, &config, bus, None, shutdown).await
        })
    };
    wait_for_ping(&gateway_url).await;

    let request = tokio::spawn(
        reqwest::Client::new()
            .post(format!("{}/export", gateway_url))
            .json(&json!([{"a": 1}]))
            .send(),
    );
    received.notified().await;
    shutdown.cancel();

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "a\n1\n");

    tokio::time::timeout(Duration::from_secs(5), gateway)
        .await
        .expect("gateway did not stop")
        .unwrap()
        .unwrap();
    workers_down.cancel();
}
