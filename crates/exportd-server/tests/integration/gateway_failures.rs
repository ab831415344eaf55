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

//! Gateway answers when the rest of the pipeline misbehaves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::post;
use axum::{Json, Router};
use exportd::{InMemoryBus, MessageBus};
use exportd_server::services;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{dead_url, deploy, local_listener, test_config, wait_for_ping};

/// Starts a gateway alone, pointed at `worker_url`, with a 1s wait budget.
async fn lone_gateway(worker_url: String, shutdown: CancellationToken) -> String {
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(output.path());
    config.gateway.worker_url = worker_url;
    config.gateway.wait_timeout_secs = 1;

    let (listener, url) = local_listener().await;
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    tokio::spawn(async move { services::serve_gateway(listener, &config, bus, None, shutdown).await });
    wait_for_ping(&url).await;
    url
}

/// A worker that accepts everything and never produces a completion.
async fn silent_worker(shutdown: CancellationToken) -> String {
    let (listener, url) = local_listener().await;
    let app = Router::new().route(
        "/export",
        post(|| async { Json(json!({"message": "successfully received request"})) }),
    );
    tokio::spawn(exportd_server::serve(listener, app, shutdown));
    url
}

#[tokio::test]
async fn test_missing_completion_times_out() {
    let shutdown = CancellationToken::new();
    let worker_url = silent_worker(shutdown.clone()).await;
    let gateway_url = lone_gateway(worker_url, shutdown.clone()).await;

    let started = Instant::now();
    let response = reqwest::Client::new()
        .post(format!("{}/export", gateway_url))
        .json(&json!([{"a": 1}]))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::REQUEST_TIMEOUT);
    assert!(started.elapsed() >= Duration::from_secs(1));
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    shutdown.cancel();
}

#[tokio::test]
async fn test_unreachable_worker_is_bad_gateway() {
    let shutdown = CancellationToken::new();
    let gateway_url = lone_gateway(dead_url(), shutdown.clone()).await;

    let started = Instant::now();
    let response = reqwest::Client::new()
        .post(format!("{}/export", gateway_url))
        .json(&json!([{"a": 1}]))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    // No wait for a completion that can never come
    assert!(started.elapsed() < Duration::from_secs(1));

    shutdown.cancel();
}

#[tokio::test]
async fn test_worker_rejection_is_bad_gateway() {
    let shutdown = CancellationToken::new();
    let (listener, worker_url) = local_listener().await;
    let app = Router::new().route(
        "/export",
        post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy") }),
    );
    tokio::spawn(exportd_server::serve(listener, app, shutdown.clone()));
    let gateway_url = lone_gateway(worker_url, shutdown.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/export", gateway_url))
        .json(&json!([]))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    shutdown.cancel();
}

#[tokio::test]
async fn test_failed_conversion_surfaces_as_timeout() {
    let deployment = deploy(|config| config.gateway.wait_timeout_secs = 1).await;

    // A bare number has no tabular shape; the worker logs and stays silent
    let response = reqwest::Client::new()
        .post(format!("{}/export", deployment.gateway_url))
        .json(&json!(42))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::REQUEST_TIMEOUT);
    assert_eq!(deployment.bus.stats().published(), 0);
    deployment.stop().await;
}
