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

//! Process wiring for each service: bind, subscribe, serve until shutdown.
//!
//! The `serve_*` functions take an already bound listener so callers (the
//! standalone mode, integration tests) can pick ephemeral ports.

use std::sync::Arc;

use anyhow::{Context, Result};
use exportd::config::ExportdConfig;
use exportd::{CorrelationStore, FileStore, InMemoryBus, MessageBus, Transcoder};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::gateway::{self, CompletionListener, GatewayState, WorkerClient};
use crate::router::{self, CompletionRouter};
use crate::worker::{self, ConversionWorker};

async fn bind(service: &str, address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {} on {}", service, address))
}

pub async fn run_gateway(
    config: &ExportdConfig,
    bus: Arc<dyn MessageBus>,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind("gateway", &config.gateway.bind_address).await?;
    serve_gateway(listener, config, bus, metrics, shutdown).await
}

/// Runs the gateway: correlation store and its sweeper, the completion
/// listener, and the HTTP front.
pub async fn serve_gateway(
    listener: TcpListener,
    config: &ExportdConfig,
    bus: Arc<dyn MessageBus>,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let store = Arc::new(CorrelationStore::new(config.correlation.store_config()));
    let sweeper = store.spawn_sweeper(shutdown.clone());

    let completions = CompletionListener::new(bus, Arc::clone(&store), &config.gateway.queue);
    let subscription = completions
        .subscribe()
        .await
        .context("Failed to subscribe to addressed completions")?;
    // Handlers still draining after shutdown need completions, so the
    // listener outlives the HTTP front
    let listening = CancellationToken::new();
    let consumer = {
        let listening = listening.clone();
        tokio::spawn(async move { completions.consume(subscription, listening).await })
    };

    let worker = WorkerClient::new(&config.gateway.worker_url, config.gateway.forward_timeout())
        .context("Failed to build worker client")?;
    let state =
        GatewayState::new(store, worker, config.gateway.wait_timeout()).with_metrics(metrics);
    let app = gateway::app(state, config.gateway.max_body_bytes);

    info!(
        address = %listener.local_addr()?,
        worker_url = %config.gateway.worker_url,
        wait_timeout_secs = config.gateway.wait_timeout_secs,
        "Gateway listening"
    );
    let served = crate::serve(listener, app, shutdown.clone()).await;

    shutdown.cancel();
    listening.cancel();
    let _ = consumer.await;
    let _ = sweeper.await;
    served.context("Gateway server failed")
}

pub async fn run_worker(
    config: &ExportdConfig,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind("worker", &config.worker.bind_address).await?;
    serve_worker(listener, config, bus, shutdown).await
}

pub async fn serve_worker(
    listener: TcpListener,
    config: &ExportdConfig,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
) -> Result<()> {
    let files = FileStore::new(&config.worker.output_dir);
    files
        .ensure_ready()
        .await
        .context("Failed to prepare output directory")?;

    let worker = ConversionWorker::new(bus, files, Transcoder::new(config.worker.transcode));
    worker
        .declare()
        .await
        .context("Failed to declare raw completion exchange")?;

    info!(
        address = %listener.local_addr()?,
        output_dir = %config.worker.output_dir.display(),
        "Conversion worker listening"
    );
    let app = worker::app(worker.clone(), config.worker.max_body_bytes);
    let served = crate::serve(listener, app, shutdown).await;

    worker.drain().await;
    served.context("Worker server failed")
}

pub async fn run_router(
    config: &ExportdConfig,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = bind("router", &config.router.bind_address).await?;
    serve_router(listener, config, bus, shutdown).await
}

/// Runs the completion router with its `/ping` endpoint.
pub async fn serve_router(
    listener: TcpListener,
    config: &ExportdConfig,
    bus: Arc<dyn MessageBus>,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = CompletionRouter::new(bus, &config.router.queue);
    let subscription = router
        .subscribe()
        .await
        .context("Failed to subscribe to raw completions")?;
    let consumer = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { router.consume(subscription, shutdown).await })
    };

    info!(address = %listener.local_addr()?, "Completion router listening");
    let served = crate::serve(listener, router::app(), shutdown.clone()).await;

    shutdown.cancel();
    let _ = consumer.await;
    served.context("Router health server failed")
}

/// All three services in one process over an in-memory bus.
///
/// Only the gateway listens on its configured address; the worker gets an
/// ephemeral loopback port that the gateway is pointed at, and the router
/// runs without its health endpoint.
pub async fn run_standalone(
    config: &ExportdConfig,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let gateway_listener = bind("gateway", &config.gateway.bind_address).await?;
    serve_standalone(gateway_listener, config, metrics, shutdown).await
}

pub async fn serve_standalone(
    gateway_listener: TcpListener,
    config: &ExportdConfig,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());

    let worker_listener = bind("worker", "127.0.0.1:0").await?;
    let mut config = config.clone();
    config.gateway.worker_url = format!("http://{}", worker_listener.local_addr()?);

    // Subscribe the router before anything can publish
    let router = CompletionRouter::new(Arc::clone(&bus), &config.router.queue);
    let subscription = router
        .subscribe()
        .await
        .context("Failed to subscribe to raw completions")?;
    // The worker and router stop only after the gateway has answered every
    // request it accepted
    let backend = CancellationToken::new();
    let router_task = {
        let backend = backend.clone();
        tokio::spawn(async move { router.consume(subscription, backend).await })
    };

    let worker_task = {
        let (config, bus, backend) = (config.clone(), Arc::clone(&bus), backend.clone());
        tokio::spawn(async move { serve_worker(worker_listener, &config, bus, backend).await })
    };

    let result = serve_gateway(gateway_listener, &config, bus, metrics, shutdown.clone()).await;

    shutdown.cancel();
    backend.cancel();
    match worker_task.await {
        Ok(worker_result) => worker_result?,
        Err(e) => return Err(e).context("Worker task panicked"),
    }
    let _ = router_task.await;
    result
}
