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

//! Conversion worker.
//!
//! Accepts an [`ExportRequest`] on `POST /export`, answers immediately, and
//! converts in the background: transcode, write the file, announce it on the
//! raw completion exchange under `csv.<id>.<request timestamp>`.
//!
//! A conversion that fails at any step is logged and produces no completion;
//! the waiting gateway runs into its own timeout. Background conversions are
//! tracked so shutdown can let them finish with [`ConversionWorker::drain`].

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use exportd::bus::publish_json;
use exportd::routing::RAW_COMPLETION_EXCHANGE;
use exportd::storage::output_file_name;
use exportd::{
    BusError, CompletionRecord, ExportRequest, FileStore, MessageBus, RoutingKey, Transcoder,
    ValidationError,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::error::{ApiError, WorkerError};

#[derive(Clone)]
pub struct ConversionWorker {
    bus: Arc<dyn MessageBus>,
    files: FileStore,
    transcoder: Arc<Transcoder>,
    tracker: TaskTracker,
}

impl ConversionWorker {
    pub fn new(bus: Arc<dyn MessageBus>, files: FileStore, transcoder: Transcoder) -> Self {
        Self {
            bus,
            files,
            transcoder: Arc::new(transcoder),
            tracker: TaskTracker::new(),
        }
    }

    /// Declares the raw completion exchange this worker publishes to.
    pub async fn declare(&self) -> Result<(), BusError> {
        self.bus.declare_exchange(RAW_COMPLETION_EXCHANGE).await
    }

    /// Runs one conversion to completion and returns the record it published.
    pub async fn handle(&self, request: ExportRequest) -> Result<CompletionRecord, WorkerError> {
        self.files.ensure_ready().await?;

        let csv = self.transcoder.export(&request.payload)?;
        let file_name = output_file_name(&request.id, request.timestamp, Utc::now().timestamp());
        let path = self.files.write(&file_name, &csv).await?;

        let record = CompletionRecord::new(
            request.id.as_str(),
            path.to_string_lossy(),
            request.timestamp,
        );
        let key = RoutingKey::raw(request.id.as_str(), request.timestamp);
        publish_json(self.bus.as_ref(), RAW_COMPLETION_EXCHANGE, &key, &record).await?;

        debug!(request_id = %record.id, routing_key = %key, "Raw completion published");
        Ok(record)
    }

    /// Converts `request` on a background task, logging the outcome.
    pub fn spawn(&self, request: ExportRequest) -> JoinHandle<()> {
        let worker = self.clone();
        self.tracker.spawn(async move {
            let id = request.id.clone();
            match worker.handle(request).await {
                Ok(record) => {
                    metrics::counter!("exportd_worker_conversions_total", "outcome" => "completed")
                        .increment(1);
                    info!(request_id = %id, file_path = %record.file_path, "Export written");
                }
                Err(e) => {
                    metrics::counter!("exportd_worker_conversions_total", "outcome" => "failed")
                        .increment(1);
                    error!(request_id = %id, error = %e, "Export failed, no completion sent");
                }
            }
        })
    }

    /// Waits for every background conversion to finish. Call once the HTTP
    /// front has stopped accepting requests.
    pub async fn drain(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            info!(pending = self.tracker.len(), "Waiting for conversions to finish");
        }
        self.tracker.wait().await;
    }
}

pub fn app(worker: ConversionWorker, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/export", post(accept))
        .route("/ping", get(crate::ping))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(worker)
}

async fn accept(
    State(worker): State<ConversionWorker>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: ExportRequest =
        serde_json::from_slice(&body).map_err(ValidationError::InvalidJson)?;
    request.check_id()?;

    info!(request_id = %request.id, timestamp = request.timestamp, "Export request received");
    worker.spawn(request);

    Ok(Json(json!({ "message": "successfully received request" })))
}
