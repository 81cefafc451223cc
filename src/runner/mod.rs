//! Standalone process entry point for a single [`crate::Broker`] or [`crate::Core`], gated
//! behind the `runner` feature (matching the teacher crate's own optional `runner` module, gated
//! on `dep:clap`/`dep:anyhow`).
//!
//! This is deliberately thin: it loads one participant's configuration from a TOML file, installs
//! a `tracing-subscriber` `EnvFilter` sink (library crates never do this themselves), spawns the
//! participant, and idles until either a `ctrl_c` or the participant's processing task exits.
//! Everything it needs -- `BrokerConfig`/`CoreConfig` `Deserialize` and `Broker::spawn`/
//! `Core::spawn` -- already exists on the library side; this module only wires a CLI onto it.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::{Broker, BrokerConfig, Core, CoreConfig, LogLevel};

/// A `cosim` participant process: either the root/an intermediate node of the broker tree, or a
/// leaf hosting federates.
#[derive(Debug, Parser)]
#[command(name = "cosim", about = "Run a single cosim broker or core as its own process")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a broker (root or intermediate) from a TOML config file.
    Broker {
        /// Path to a TOML file deserializing to [`BrokerConfig`].
        config: PathBuf,
    },
    /// Run a core (federate-hosting leaf) from a TOML config file.
    Core {
        /// Path to a TOML file deserializing to [`CoreConfig`].
        config: PathBuf,
    },
}

/// Parses `argv`, loads the named config file, spawns the participant it describes, and blocks
/// until the process receives `ctrl_c`.
pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Broker { config } => {
            let config: BrokerConfig = read_config(&config)?;
            init_tracing(config.log_level);
            tracing::info!(name = %config.name, "starting broker");
            let handle = Broker::spawn(config);
            wait_for_shutdown().await;
            handle.shutdown();
        }
        Command::Core { config } => {
            let config: CoreConfig = read_config(&config)?;
            init_tracing(config.log_level);
            tracing::info!(name = %config.name, "starting core");
            let _handle: crate::CoreHandle = Core::spawn(config);
            wait_for_shutdown().await;
        }
    }
    Ok(())
}

fn read_config<T: for<'de> Deserialize<'de>>(path: &PathBuf) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Maps a participant's configured [`LogLevel`] onto an `EnvFilter` directive. `RUST_LOG`, if
/// set, always takes precedence -- this is only the default when the operator hasn't opted into
/// something more specific.
fn init_tracing(level: LogLevel) {
    let default_directive = match level {
        LogLevel::Error => "error",
        LogLevel::Warning => "warn",
        LogLevel::Summary => "info",
        LogLevel::Connections | LogLevel::Interfaces => "info,cosim_broker=debug",
        LogLevel::Timing => "info,cosim_broker=debug,cosim_runtime=debug",
        LogLevel::Data | LogLevel::Trace => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn wait_for_shutdown() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl_c; exiting immediately");
    }
}
