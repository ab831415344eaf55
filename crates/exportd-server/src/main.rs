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

//! exportd-server - runs the exportd gateway, conversion worker or
//! completion router, or all three in one process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exportd::config::{
    generate_default_config_toml, require_shared_bus, ConfigLoader, ExportdConfig, Validate,
};
use exportd::MessageBus;
use exportd::logging::init_logging;
use exportd_server::gateway::install_metrics_recorder;
use exportd_server::services;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// exportd - JSON to CSV export services
#[derive(Parser)]
#[command(name = "exportd-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (can also be set via EXPORTD_CONFIG)
    #[arg(short, long, env = "EXPORTD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Message bus address, overriding `bus.brokers`
    #[arg(long, env = "EXPORTD_BUS_URL", global = true)]
    bus_url: Option<String>,

    /// Conversion worker base URL, overriding `gateway.worker_url`
    #[arg(long, env = "EXPORTD_WORKER_URL", global = true)]
    worker_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the public gateway front
    Gateway,
    /// Run the conversion worker
    Worker,
    /// Run the completion router
    Router,
    /// Run gateway, worker and router in one process over an in-memory bus
    Standalone,
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print a configuration file with every default filled in
    Default,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config {
        command: ConfigCommands::Default,
    } = &cli.command
    {
        print!("{}", generate_default_config_toml()?);
        return Ok(());
    }

    let config = load_config(&cli)?;

    if let Commands::Config {
        command: ConfigCommands::Show,
    } = &cli.command
    {
        print!(
            "{}",
            toml::to_string_pretty(&config).context("Failed to render configuration")?
        );
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        });
    }

    match cli.command {
        Commands::Gateway => {
            let bus = connect_shared_bus(&config, "gateway")?;
            services::run_gateway(&config, bus, metrics_handle(), shutdown).await
        }
        Commands::Worker => {
            let bus = connect_shared_bus(&config, "worker")?;
            services::run_worker(&config, bus, shutdown).await
        }
        Commands::Router => {
            let bus = connect_shared_bus(&config, "router")?;
            services::run_router(&config, bus, shutdown).await
        }
        Commands::Standalone => services::run_standalone(&config, metrics_handle(), shutdown).await,
        Commands::Config { .. } => Ok(()),
    }
}

fn load_config(cli: &Cli) -> Result<ExportdConfig> {
    let mut config = ConfigLoader::new()
        .load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(bus_url) = &cli.bus_url {
        config.bus.brokers = bus_url.clone();
    }
    if let Some(worker_url) = &cli.worker_url {
        config.gateway.worker_url = worker_url.clone();
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn connect_shared_bus(
    config: &ExportdConfig,
    service: &'static str,
) -> Result<Arc<dyn MessageBus>> {
    require_shared_bus(&config.bus, service).context("Invalid configuration")?;
    exportd::bus::connect(&config.bus).context("Failed to connect to message bus")
}

fn metrics_handle() -> Option<PrometheusHandle> {
    match install_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed, /metrics disabled");
            None
        }
    }
}
