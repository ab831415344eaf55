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

//! Shared helpers: ephemeral listeners, a test configuration, and a full
//! three-service deployment over one in-memory bus.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use exportd::config::ExportdConfig;
use exportd::{InMemoryBus, MessageBus};
use exportd_server::services;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn test_config(output_dir: &Path) -> ExportdConfig {
    let mut config = ExportdConfig::default();
    config.worker.output_dir = output_dir.to_path_buf();
    config.gateway.wait_timeout_secs = 5;
    config.gateway.forward_timeout_secs = 2;
    config.correlation.poll_interval_ms = 20;
    config
}

/// A loopback listener on a free port and its base URL.
pub async fn local_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// A base URL that refuses connections.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Waits until `GET <base_url>/ping` answers 200.
pub async fn wait_for_ping(base_url: &str) {
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(response) = client.get(format!("{}/ping", base_url)).send().await {
            if response.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never answered /ping", base_url);
}

pub struct Deployment {
    pub gateway_url: String,
    pub bus: Arc<InMemoryBus>,
    pub config: ExportdConfig,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<anyhow::Result<()>>>,
    _output: TempDir,
}

impl Deployment {
    /// Cancels every service and checks that each one exited cleanly.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("service did not stop")
                .expect("service panicked")
                .expect("service failed");
        }
    }
}

impl Drop for Deployment {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Starts worker, router and gateway as separate services sharing one bus.
/// `configure` may adjust the configuration before anything starts.
pub async fn deploy(configure: impl FnOnce(&mut ExportdConfig)) -> Deployment {
    let output = tempfile::tempdir().unwrap();
    let mut config = test_config(&output.path().join("csvfiles"));

    let (worker_listener, worker_url) = local_listener().await;
    let (router_listener, router_url) = local_listener().await;
    let (gateway_listener, gateway_url) = local_listener().await;
    config.gateway.worker_url = worker_url.clone();
    configure(&mut config);

    let bus = Arc::new(InMemoryBus::new());
    let shared: Arc<dyn MessageBus> = bus.clone();
    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let (config, bus, shutdown) = (config.clone(), shared.clone(), shutdown.clone());
        tasks.push(tokio::spawn(async move {
            services::serve_worker(worker_listener, &config, bus, shutdown).await
        }));
    }
    {
        let (config, bus, shutdown) = (config.clone(), shared.clone(), shutdown.clone());
        tasks.push(tokio::spawn(async move {
            services::serve_router(router_listener, &config, bus, shutdown).await
        }));
    }
    // The router answers /ping only once its queue is bound
    wait_for_ping(&worker_url).await;
    wait_for_ping(&router_url).await;

    {
        let (config, bus, shutdown) = (config.clone(), shared, shutdown.clone());
        tasks.push(tokio::spawn(async move {
            services::serve_gateway(gateway_listener, &config, bus, None, shutdown).await
        }));
    }
    wait_for_ping(&gateway_url).await;

    Deployment {
        gateway_url,
        bus,
        config,
        shutdown,
        tasks,
        _output: output,
    }
}
