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

use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::types::*;

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Invalid bind address for {service}: {address}")]
    InvalidBindAddress {
        service: &'static str,
        address: String,
    },

    #[error("Invalid worker URL: {url} (must start with http:// or https://)")]
    InvalidWorkerUrl { url: String },

    #[error("Invalid timeout value for {field}: must be positive")]
    InvalidTimeout { field: &'static str },

    #[error("Invalid log level: {level}")]
    InvalidLogLevel { level: String },

    #[error("Invalid bus setting: {message}")]
    InvalidBus { message: String },

    #[error("Invalid queue name for {service}: must not be empty")]
    EmptyQueue { service: &'static str },

    #[error("The {service} service cannot use the in-memory bus: it only reaches services in the same process (use `standalone` or a shared backend such as kafka)")]
    ProcessLocalBus { service: &'static str },

    #[error("Invalid CSV delimiter {delimiter:?}: must be tab or a printable ASCII character other than '\"'")]
    InvalidDelimiter { delimiter: char },

    #[error("Invalid body limit for {service}: must be positive")]
    InvalidBodyLimit { service: &'static str },

    #[error("Multiple validation errors: {errors:?}")]
    Multiple { errors: Vec<ConfigValidationError> },
}

pub trait Validate {
    fn validate(&self) -> Result<(), ConfigValidationError>;
}

impl Validate for ExportdConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        let mut errors: Vec<ConfigValidationError> = [
            self.bus.validate(),
            self.gateway.validate(),
            self.worker.validate(),
            self.router.validate(),
            self.correlation.validate(),
            self.logging.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigValidationError::Multiple { errors }),
        }
    }
}

/// Checks that `bus` can carry messages between separately running
/// services. `service` names the process that is about to start.
pub fn require_shared_bus(
    bus: &BusConfig,
    service: &'static str,
) -> Result<(), ConfigValidationError> {
    match bus.backend {
        BusBackend::Memory => Err(ConfigValidationError::ProcessLocalBus { service }),
        BusBackend::Kafka => Ok(()),
    }
}

fn check_bind(service: &'static str, address: &str) -> Result<(), ConfigValidationError> {
    address
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ConfigValidationError::InvalidBindAddress {
            service,
            address: address.to_string(),
        })
}

impl Validate for BusConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.backend == BusBackend::Kafka && self.brokers.trim().is_empty() {
            return Err(ConfigValidationError::InvalidBus {
                message: "brokers must be set for the kafka backend".to_string(),
            });
        }
        if self.publish_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidTimeout {
                field: "bus.publish_timeout_ms",
            });
        }
        if self.topic_partitions < 1 || self.topic_replication < 1 {
            return Err(ConfigValidationError::InvalidBus {
                message: "topic_partitions and topic_replication must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Validate for GatewayConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        check_bind("gateway", &self.bind_address)?;

        if !(self.worker_url.starts_with("http://") || self.worker_url.starts_with("https://")) {
            return Err(ConfigValidationError::InvalidWorkerUrl {
                url: self.worker_url.clone(),
            });
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout {
                field: "gateway.wait_timeout_secs",
            });
        }
        if self.forward_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout {
                field: "gateway.forward_timeout_secs",
            });
        }
        if self.queue.trim().is_empty() {
            return Err(ConfigValidationError::EmptyQueue { service: "gateway" });
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigValidationError::InvalidBodyLimit { service: "gateway" });
        }
        Ok(())
    }
}

impl Validate for WorkerConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        check_bind("worker", &self.bind_address)?;
        if self.max_body_bytes == 0 {
            return Err(ConfigValidationError::InvalidBodyLimit { service: "worker" });
        }

        // Quote and line breaks are CSV structure; anything else must be visible ASCII
        let delimiter = self.transcode.delimiter;
        if !(delimiter == b'\t' || delimiter.is_ascii_graphic()) || delimiter == b'"' {
            return Err(ConfigValidationError::InvalidDelimiter {
                delimiter: char::from(delimiter),
            });
        }
        Ok(())
    }
}

impl Validate for RouterConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        check_bind("router", &self.bind_address)?;
        if self.queue.trim().is_empty() {
            return Err(ConfigValidationError::EmptyQueue { service: "router" });
        }
        Ok(())
    }
}

impl Validate for CorrelationConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidTimeout {
                field: "correlation.poll_interval_ms",
            });
        }
        if self.entry_ttl_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout {
                field: "correlation.entry_ttl_secs",
            });
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidTimeout {
                field: "correlation.sweep_interval_secs",
            });
        }
        Ok(())
    }
}

impl Validate for LoggingConfig {
    fn validate(&self) -> Result<(), ConfigValidationError> {
        EnvFilter::try_new(&self.level)
            .map(|_| ())
            .map_err(|_| ConfigValidationError::InvalidLogLevel {
                level: self.level.clone(),
            })
    }
}
