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

//! # exportd-server
//!
//! The three exportd services as axum applications and bus consumers:
//!
//! - [`gateway`]: the public `POST /export` front that parks each caller
//!   until its file is ready.
//! - [`worker`]: converts a forwarded request into a CSV file and announces
//!   it on the raw completion exchange.
//! - [`router`]: re-addresses raw completions (`csv.<id>.<ts>`) to the
//!   waiting gateway (`req.<id>`).
//!
//! [`services`] wires each of them to a listener, a bus and a shutdown token;
//! the `exportd-server` binary is a thin CLI over it.

pub mod error;
pub mod gateway;
pub mod router;
pub mod services;
pub mod worker;

use axum::Json;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::{ApiError, WorkerError};

/// `GET /ping` handler shared by every service.
pub async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

/// Serve `app` on `listener` until `shutdown` is cancelled, then finish the
/// in-flight requests.
pub async fn serve(
    listener: TcpListener,
    app: axum::Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
