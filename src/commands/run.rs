use anyhow::{Context, Result};
use hourly_fifo::{Scheduler, Settings, shutdown_channel};
use log::info;
use tokio::signal::unix::{SignalKind, signal};

/// Run the manager until SIGINT or SIGTERM.
pub fn run(settings: Settings) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?;

    runtime.block_on(async move {
        let (tx, rx) = shutdown_channel();
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                _ = terminate.recv() => info!("received SIGTERM, shutting down"),
            }
            let _ = tx.send(true);
        });

        let mut scheduler = Scheduler::new(settings);
        scheduler.run(rx).await.context("Startup pass failed")?;
        Ok::<(), anyhow::Error>(())
    })
}
