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

//! # exportd
//!
//! Core building blocks for turning a JSON payload into a downloadable CSV file
//! across three independently deployed services that only talk to each other
//! through topic-routed publish/subscribe messaging.
//!
//! - [`transcoder`] converts a JSON record set into CSV bytes.
//! - [`correlation`] parks a caller until the completion for its request id
//!   arrives, with claim-on-read delivery and bounded waits.
//! - [`routing`] owns the routing-key grammar (`csv.<id>.<ts>`, `req.<id>`)
//!   and the exchange/binding names shared by every service.
//! - [`bus`] abstracts the topic exchange (in-memory, or Kafka with the
//!   `kafka` feature).
//! - [`messages`] holds the JSON schemas that travel between services.
//!
//! The HTTP services built on top of these live in the `exportd-server` crate.

pub mod bus;
pub mod config;
pub mod correlation;
pub mod error;
pub mod logging;
pub mod messages;
pub mod routing;
pub mod storage;
pub mod transcoder;

pub use bus::{Delivery, InMemoryBus, MessageBus, Subscription};
pub use correlation::{Claim, CorrelationStore, CorrelationStoreConfig};
pub use error::{
    BusError, ConfigError, EncodingError, LoggingError, MalformedMessage, StorageError,
    UpstreamError, ValidationError,
};
pub use messages::{AddressedCompletion, CompletionRecord, ExportRequest};
pub use routing::RoutingKey;
pub use storage::FileStore;
pub use transcoder::{HeaderPolicy, TranscodeOptions, Transcoder};
