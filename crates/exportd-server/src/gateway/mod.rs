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

//! Gateway front: the only service callers talk to.
//!
//! `POST /export` accepts any JSON body, assigns it a fresh request id,
//! forwards it to the conversion worker and then parks until the completion
//! for that id reaches the correlation store (or the wait budget runs out).
//! The finished file is streamed back as `text/csv`.

mod client;
mod listener;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use exportd::storage::{download_name, open_reference};
use exportd::{Claim, CompletionRecord, CorrelationStore, ExportRequest};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio_util::io::ReaderStream;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::ApiError;

pub use client::WorkerClient;
pub use listener::{CompletionListener, ListenOutcome};

/// Shared state of the gateway's HTTP handlers.
#[derive(Clone)]
pub struct GatewayState {
    store: Arc<CorrelationStore>,
    worker: WorkerClient,
    wait_timeout: Duration,
    metrics: Option<PrometheusHandle>,
}

impl GatewayState {
    pub fn new(store: Arc<CorrelationStore>, worker: WorkerClient, wait_timeout: Duration) -> Self {
        Self {
            store,
            worker,
            wait_timeout,
            metrics: None,
        }
    }

    /// Serve `handle`'s registry on `GET /metrics`.
    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    pub fn store(&self) -> &Arc<CorrelationStore> {
        &self.store
    }
}

/// Installs the process-wide Prometheus recorder.
///
/// Can only succeed once per process.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn app(state: GatewayState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/export", post(export))
        .route("/ping", get(crate::ping))
        .route("/metrics", get(render_metrics))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn export(State(state): State<GatewayState>, body: Bytes) -> Result<Response, ApiError> {
    let request = ExportRequest::from_body(&body).inspect_err(|e| {
        info!(error = %e, "Rejected export request");
        record_outcome("invalid");
    })?;
    let id = request.id.clone();
    info!(request_id = %id, "Export requested");

    if let Err(e) = state.worker.submit(&request).await {
        warn!(request_id = %id, error = %e, "Conversion worker did not accept request");
        record_outcome("upstream_error");
        return Err(e.into());
    }

    match state.store.await_completion(&id, state.wait_timeout).await {
        Claim::Completed(record) => {
            let response = file_response(&record).await.inspect_err(|e| {
                warn!(request_id = %id, error = %e, "Completed export could not be read");
                record_outcome("unreadable");
            })?;
            info!(request_id = %id, file_path = %record.file_path, "Export delivered");
            record_outcome("completed");
            Ok(response)
        }
        Claim::TimedOut => {
            record_outcome("timed_out");
            Err(ApiError::TimedOut {
                id,
                waited_secs: state.wait_timeout.as_secs(),
            })
        }
    }
}

async fn file_response(record: &CompletionRecord) -> Result<Response, ApiError> {
    let file = open_reference(&record.file_path).await?;
    let disposition = format!("attachment; filename={}", download_name(&record.file_path));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| ApiError::Internal(format!("invalid file name: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/csv")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn render_metrics(State(state): State<GatewayState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!("exportd_gateway_requests_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use exportd::CorrelationStoreConfig;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state_with_worker(worker_url: &str, wait: Duration) -> GatewayState {
        let store = Arc::new(CorrelationStore::new(CorrelationStoreConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }));
        let worker = WorkerClient::new(worker_url, Duration::from_secs(2)).unwrap();
        GatewayState::new(store, worker, wait)
    }

    fn dead_worker_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    async fn error_message(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&body).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_ping() {
        let app = app(state_with_worker("http://127.0.0.1:1", Duration::from_secs(1)), 1024);
        let response = app
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"message":"pong"}"#);
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let app = app(state_with_worker("http://127.0.0.1:1", Duration::from_secs(1)), 1024);
        let response = app
            .oneshot(Request::post("/export").body(Body::from("{oops")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!error_message(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_bad_gateway() {
        let state = state_with_worker(&dead_worker_url(), Duration::from_secs(5));
        let store = state.store().clone();
        let app = app(state, 1024);

        let response = app
            .oneshot(Request::post("/export").body(Body::from("[]")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(store.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let app = app(state_with_worker("http://127.0.0.1:1", Duration::from_secs(1)), 8);
        let response = app
            .oneshot(
                Request::post("/export")
                    .body(Body::from(r#"[{"a":"0123456789"}]"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = app(state_with_worker("http://127.0.0.1:1", Duration::from_secs(1)), 1024);
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_response_headers_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ABC123--1-2.csv");
        std::fs::write(&path, "a,b\n1,x\n").unwrap();

        let record = CompletionRecord::new("ABC123", path.to_str().unwrap(), 1);
        let response = file_response(&record).await.unwrap();

        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=ABC123--1-2.csv"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"a,b\n1,x\n");
    }

    #[tokio::test]
    async fn test_missing_file_is_internal_error() {
        let record = CompletionRecord::new("ABC123", "/nonexistent/ABC123.csv", 1);
        let err = file_response(&record).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
