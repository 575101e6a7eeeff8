//! QuickKV - A Minimal In-Memory Key-Value Server
//!
//! This is the main entry point for the QuickKV server.
//! It parses the command line, sets up logging and runs the server until
//! Ctrl+C.

use anyhow::Context;
use clap::Parser;
use quickkv::config::Cli;
use quickkv::server;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Set up logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = cli.server_config();
    info!(
        "QuickKV v{} starting on {}",
        quickkv::VERSION,
        config.bind_address()
    );
    if config.active_expiry.is_some() {
        info!("Active expiry enabled");
    }

    // Set up graceful shutdown
    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    server::run(config, shutdown)
        .await
        .context("server failed to start")?;

    Ok(())
}
