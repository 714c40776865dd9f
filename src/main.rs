//! The Fleetprof backend node.

mod app;
mod assignment;
mod association;
mod config;
#[cfg(test)]
mod config_test;
mod daemon;
mod election;
mod error;
#[cfg(test)]
mod fixtures;
mod framing;
mod models;
mod server;
mod store;
mod utils;
mod wire;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing/logging system.
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG env var.
        .with(tracing_subscriber::EnvFilter::from_default_env())
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true),
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let cfg = Arc::new(Config::new()?);
    tracing::info!(
        backend_id = %cfg.backend_id,
        ip_address = %cfg.ip_address,
        backend_port = %cfg.backend_port,
        load_report_interval_secs = %cfg.load_report_interval_secs,
        max_simultaneous_work = %cfg.max_simultaneous_work,
        "starting Fleetprof backend node",
    );
    if let Err(err) = App::new(cfg).await?.spawn().await {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    Ok(())
}
