//! # ko-operator
//!
//! Entry point for the KoBuilder operator.
//!
//! ## Startup
//!
//! 1. **CLI** - Parse the subcommand and its flags
//! 2. **Configuration** - Defaults, then `--config`, then `KO_OPERATOR_*`
//! 3. **Tracing** - `RUST_LOG` if set, otherwise the configured filter
//! 4. **Dispatch** - `run`, `crd` or `render`
//!
//! Logs go to stderr so `crd` and `render` output can be piped to kubectl.

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ko_core::OperatorConfig;
use ko_operator::cli::Cli;
use ko_operator::commands::execute_command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = OperatorConfig::load(cli.command.config_path())
        .context("Failed to load operator configuration")?;

    init_tracing(&config.log_filter);
    debug!(?config, "Configuration loaded");

    execute_command(cli.command, config).await
}

/// Initialize tracing subscriber with environment filter.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
