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

//! Configuration for the exportd services.
//!
//! Configuration is a single TOML document with one section per concern.
//! Every field has a default, so an empty file (or no file) yields a working
//! single-process setup:
//!
//! ```toml
//! [bus]
//! backend = "kafka"
//! brokers = "${EXPORTD_BUS_BROKERS:-event-dispatcher:9092}"
//!
//! [gateway]
//! worker_url = "http://export-service:8080"
//! wait_timeout_secs = 15
//!
//! [worker]
//! output_dir = "/csvfiles"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

mod defaults;
mod loader;
mod types;
mod validation;

pub use defaults::generate_default_config_toml;
pub use loader::ConfigLoader;
pub use types::*;
pub use validation::{require_shared_bus, ConfigValidationError, Validate};
