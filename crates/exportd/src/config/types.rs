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

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationStoreConfig;
use crate::transcoder::TranscodeOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportdConfig {
    pub bus: BusConfig,
    pub gateway: GatewayConfig,
    pub worker: WorkerConfig,
    pub router: RouterConfig,
    pub correlation: CorrelationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process exchange; only useful when every service shares a process.
    Memory,
    /// Kafka cluster at `brokers` (requires the `kafka` feature).
    Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub backend: BusBackend,
    pub brokers: String,
    pub publish_timeout_ms: u64,
    pub topic_partitions: i32,
    pub topic_replication: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_address: String,
    /// Base URL of the conversion worker's HTTP ingress.
    pub worker_url: String,
    /// How long a caller waits for its completion before getting a 408.
    pub wait_timeout_secs: u64,
    /// Timeout for forwarding the request to the worker.
    pub forward_timeout_secs: u64,
    /// Queue the gateway consumes addressed completions from.
    pub queue: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub bind_address: String,
    pub output_dir: PathBuf,
    pub max_body_bytes: usize,
    pub transcode: TranscodeOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub bind_address: String,
    /// Queue the router consumes raw completions from.
    pub queue: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub poll_interval_ms: u64,
    pub entry_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to daily files in this directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl GatewayConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

impl CorrelationConfig {
    pub fn store_config(&self) -> CorrelationStoreConfig {
        CorrelationStoreConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            entry_ttl: Duration::from_secs(self.entry_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}
