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

//! Full request path: gateway -> worker -> router -> gateway.

use std::time::Duration;

use exportd_server::services;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::fixtures::{deploy, local_listener, test_config, wait_for_ping};

#[tokio::test]
async fn test_export_round_trip() {
    let deployment = deploy(|_| {}).await;

    let response = reqwest::Client::new()
        .post(format!("{}/export", deployment.gateway_url))
        .json(&json!({"rows": [{"a": 1, "b": "x"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/csv");
    let disposition = response.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename="));
    assert!(disposition.ends_with(".csv"));
    assert_eq!(response.text().await.unwrap(), "a,b\n1,x\n");

    deployment.stop().await;
}

#[tokio::test]
async fn test_file_lands_in_output_directory() {
    let deployment = deploy(|_| {}).await;
    let output_dir = deployment.config.worker.output_dir.clone();

    let response = reqwest::Client::new()
        .post(format!("{}/export", deployment.gateway_url))
        .json(&json!([{"name": "Ada", "age": 36}]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let files: Vec<_> = std::fs::read_dir(&output_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].contains("--"));
    assert_eq!(
        std::fs::read_to_string(output_dir.join(&files[0])).unwrap(),
        "name,age\nAda,36\n"
    );

    deployment.stop().await;
}

#[tokio::test]
async fn test_concurrent_exports_are_not_crossed() {
    let deployment = deploy(|_| {}).await;
    let client = reqwest::Client::new();

    let requests = (0..6).map(|n| {
        let client = client.clone();
        let url = format!("{}/export", deployment.gateway_url);
        async move {
            let body = client
                .post(url)
                .json(&json!([{"n": n}]))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap();
            (n, body)
        }
    });

    let handles: Vec<_> = requests.map(tokio::spawn).collect();
    for handle in handles {
        let (n, body) = handle.await.unwrap();
        assert_eq!(body, format!("n\n{}\n", n));
    }

    // Every completion was claimed by exactly one caller
    assert_eq!(deployment.bus.stats().requeued(), 0);
    deployment.stop().await;
}

#[tokio::test]
async fn test_invalid_json_never_reaches_worker() {
    let deployment = deploy(|_| {}).await;

    let response = reqwest::Client::new()
        .post(format!("{}/export", deployment.gateway_url))
        .body("{\"rows\": [")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
    assert_eq!(deployment.bus.stats().published(), 0);

    deployment.stop().await;
}

#[tokio::test]
async fn test_standalone_round_trip() {
    let output = tempfile::tempdir().unwrap();
    let config = test_config(output.path());
    let (listener, gateway_url) = local_listener().await;
    let shutdown = CancellationToken::new();

    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            services::serve_standalone(listener, &config, None, shutdown).await
        })
    };
    wait_for_ping(&gateway_url).await;

    let response = reqwest::Client::new()
        .post(format!("{}/export", gateway_url))
        .json(&json!({"rows": [{"a": 1, "b": "x"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "a,b\n1,x\n");

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("standalone did not stop")
        .unwrap()
        .unwrap();
}
