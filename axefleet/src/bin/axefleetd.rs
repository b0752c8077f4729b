//! Fleet daemon.
//!
//! Keeps the device registry fresh, watches for alerts, and serves the
//! HTTP API until interrupted.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use axefleet::{
    daemon::Daemon,
    tracing::{init_journald_or_stdout, prelude::*},
};

#[tokio::main]
async fn main() -> Result<()> {
    init_journald_or_stdout();

    let daemon = Daemon::from_env()?;

    let cancellation = CancellationToken::new();
    let mut running = tokio::spawn(daemon.run(cancellation.clone()));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown requested");
            None
        }
        result = &mut running => Some(result),
    };
    cancellation.cancel();

    let result = match finished {
        Some(result) => result,
        None => running.await,
    };
    result.context("daemon task panicked")??;
    Ok(())
}
