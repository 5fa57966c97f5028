//! Long-running cleanup loop
//!
//! Runs the sweeper on the system clock against in-memory collaborators
//! until shutdown is signalled.

use crate::simulate::composer;
use anyhow::{ensure, Result};
use preview_core::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub(crate) fn build_sweeper(config: PreviewConfig, interval: Option<Duration>) -> Result<CleanupSweeper> {
    if let Some(interval) = interval {
        ensure!(!interval.is_zero(), "sweep interval must be positive");
    }
    let orchestrator = PreviewOrchestrator::new(
        config,
        Arc::new(InMemorySessionRegistry::new()),
        Arc::new(InMemorySchemaProvisioner::new()),
        composer(Duration::ZERO),
    );
    let sweeper = CleanupSweeper::new(orchestrator);
    Ok(match interval {
        Some(interval) => sweeper.with_interval(interval),
        None => sweeper,
    })
}

/// Sweep on every tick until `shutdown` flips to `true`
pub(crate) async fn run_until(sweeper: CleanupSweeper, shutdown: watch::Receiver<bool>) {
    sweeper.run(shutdown).await;
    info!("cleanup sweeper stopped");
}

/// Sweep until ctrl-c
pub(crate) async fn run_until_ctrl_c(sweeper: CleanupSweeper) -> Result<()> {
    let (stop, shutdown) = watch::channel(false);
    let task = tokio::spawn(run_until(sweeper, shutdown));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    // The receiver only goes away once the loop has already exited.
    let _ = stop.send(true);
    task.await?;
    Ok(())
}
