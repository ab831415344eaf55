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

//! Error types shared by every exportd component.
//!
//! Timeouts are not errors here: a wait that runs out is a normal
//! [`Claim::TimedOut`](crate::correlation::Claim::TimedOut) outcome rather
//! than a failure of the correlation store.

use std::path::PathBuf;
use thiserror::Error;

/// The inbound HTTP body could not be accepted.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request id '{id}' must be non-empty and contain only ASCII letters, digits, '-' or '_'")]
    InvalidId { id: String },
}

/// The conversion worker could not be reached, or refused the request.
#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("conversion worker at {url} is unreachable: {message}")]
    Unreachable { url: String, message: String },

    #[error("conversion worker at {url} answered {status}: {body}")]
    Rejected { url: String, status: u16, body: String },
}

/// Transcoding a payload into CSV failed.
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("payload is not a JSON array of records")]
    NotRecordSet,

    #[error("record {index} is not a JSON object")]
    NotAnObject { index: usize },

    #[error("CSV writer error: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to flush CSV output: {0}")]
    Io(#[from] std::io::Error),
}

/// A message taken off the bus could not be interpreted.
///
/// Consumers acknowledge and drop these: an unparseable message never
/// becomes parseable on redelivery.
#[derive(Error, Debug)]
pub enum MalformedMessage {
    #[error("routing key '{key}' does not match the expected shape '{expected}'")]
    RoutingKey { key: String, expected: &'static str },

    #[error("message body could not be decoded: {0}")]
    Body(#[from] serde_json::Error),

    #[error("routing key addresses '{key_id}' but the body carries '{body_id}'")]
    IdMismatch { key_id: String, body_id: String },
}

/// Failures raised by a [`MessageBus`](crate::bus::MessageBus) implementation.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("exchange '{exchange}' has not been declared")]
    ExchangeNotFound { exchange: String },

    #[error("queue '{queue}' already has a consumer")]
    QueueInUse { queue: String },

    #[error("binding pattern '{pattern}' is not a valid topic pattern")]
    InvalidBinding { pattern: String },

    #[error("the bus connection is closed")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("bus backend error: {0}")]
    Backend(String),
}

/// Failures of the file collaborator that holds transcoded output.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to prepare output directory {path}: {source}")]
    PrepareDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Loading or validating the configuration file failed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found in any search location")]
    ConfigNotFound,

    #[error("Failed to read configuration file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Environment variable substitution failed: {0}")]
    EnvSubstitutionError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] crate::config::ConfigValidationError),

    #[error("Unsupported configuration file format: {extension}")]
    UnsupportedFormat { extension: String },
}

/// The global tracing subscriber could not be installed.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Failed to create log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}
