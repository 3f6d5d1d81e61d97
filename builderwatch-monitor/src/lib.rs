pub mod config;

use anyhow::Result;
use builderwatch_connector::{EventManager, EventManagerHandle};
use config::{config_path, load_config, MonitorConfig};
use std::{collections::HashSet, sync::Arc};
use tokio::signal;

/// The main entry point for running the monitor.
/// This function handles configuration, logging, and service startup.
pub async fn run() -> Result<()> {
    let path = config_path();
    // Logging is not up yet.
    println!("Loading configuration from '{}'", &path);
    let config = load_config(&path)?;
    builderwatch_logger::init(&config.log)?;
    tracing::info!("Configuration loaded: {:#?}", &config);
    run_monitor(config).await?;

    Ok(())
}

/// Starts the engine and reports the feed until Ctrl+C.
async fn run_monitor(config: MonitorConfig) -> Result<()> {
    let (manager, handle) = EventManager::connect(Arc::new(config.connector))?;
    let engine = tokio::spawn(manager.run());
    let reporter = tokio::spawn(report_feed(handle.clone()));

    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown..."),
        Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal."),
    }
    handle.stop();
    engine.await?;
    reporter.abort();
    tracing::info!(events = handle.snapshot().len(), "Shutdown complete.");

    Ok(())
}

/// Logs every newly seen event and every change of the engine status.
async fn report_feed(handle: EventManagerHandle) {
    let mut changes = handle.subscribe_changes();
    let mut connection = handle.watch_connection();
    let mut backfill = handle.watch_backfill();
    let mut progress = handle.watch_progress();
    let mut seen = HashSet::new();
    let mut last_status = String::new();

    loop {
        let status = handle.status().to_string();
        if status != last_status {
            tracing::info!(status = %status, "Engine status changed");
            last_status = status;
        }

        // Oldest first, so the log reads chronologically.
        for event in handle.snapshot().into_iter().rev() {
            if seen.insert(event.signature.clone()) {
                tracing::info!(
                    kind = %event.kind,
                    source = ?event.source,
                    timestamp = %event.timestamp,
                    url = %event.explorer_url(),
                    "{}",
                    event.summary
                );
            }
        }

        let closed = tokio::select! {
            res = changes.changed() => res.is_err(),
            res = connection.changed() => res.is_err(),
            res = backfill.changed() => res.is_err(),
            res = progress.changed() => res.is_err(),
        };
        if closed {
            break;
        }
    }
}
