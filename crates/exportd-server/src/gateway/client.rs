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

use std::time::Duration;

use exportd::{ExportRequest, UpstreamError};
use tracing::debug;

/// Forwards export requests to the conversion worker's `POST /export`.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    export_url: String,
}

impl WorkerClient {
    /// `worker_url` is the worker's base URL, e.g. `http://export-service:8080`.
    /// `timeout` bounds both connecting and the whole request.
    pub fn new(worker_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))?;

        Ok(Self {
            http,
            export_url: format!("{}/export", worker_url.trim_end_matches('/')),
        })
    }

    pub fn export_url(&self) -> &str {
        &self.export_url
    }

    /// Hands `request` to the worker. Any transport failure or non-2xx answer
    /// is an [`UpstreamError`]; the worker's reply body is otherwise ignored.
    pub async fn submit(&self, request: &ExportRequest) -> Result<(), UpstreamError> {
        let response = self
            .http
            .post(&self.export_url)
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError::Unreachable {
                url: self.export_url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected {
                url: self.export_url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(request_id = %request.id, status = %status, "Worker accepted export request");
        Ok(())
    }
}
