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

use crate::config::types::*;
use crate::transcoder::TranscodeOptions;

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::Memory,
            brokers: "event-dispatcher:9092".to_string(),
            publish_timeout_ms: 5_000,
            topic_partitions: 1,
            topic_replication: 1,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            worker_url: "http://export-service:8080".to_string(),
            wait_timeout_secs: 15,
            forward_timeout_secs: 10,
            queue: "api-gateway".to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            output_dir: PathBuf::from("/csvfiles"),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            transcode: TranscodeOptions::default(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
            queue: "export-consumer".to_string(),
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            entry_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            directory: None,
            file_prefix: "exportd".to_string(),
        }
    }
}

/// Renders the default configuration as TOML.
pub fn generate_default_config_toml() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&ExportdConfig::default())
}
