//! Daemon command: runs the sync scheduler in the foreground.
//!
//! - Signal handler (SIGTERM/SIGINT for shutdown, SIGHUP for a sync now)
//! - Scheduler running passes of both flows, periodically if configured

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use icsync_server::{FLOWS, SignalHandler, SyncScheduler};

use crate::config::ClientConfig;
use crate::engine::Engine;
use crate::error::{ClientError, ClientResult};

/// Runs the daemon until SIGTERM/SIGINT.
pub async fn run(config: &ClientConfig, interval: Option<u64>) -> ClientResult<()> {
    if interval == Some(0) {
        return Err(ClientError::Usage(
            "--interval must be greater than zero".to_string(),
        ));
    }

    let engine = Engine::open(config).await?;
    let orchestrator = engine.orchestrator.clone();

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    let scheduler_config = config.scheduler_config(interval);
    info!(
        interval_secs = scheduler_config.periodic_interval.map(|i| i.as_secs()),
        "Starting sync daemon"
    );

    let scheduler = SyncScheduler::new(scheduler_config);
    let scheduler_handle = scheduler.handle();

    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(move |request| {
                let orchestrator = Arc::clone(&orchestrator);
                async move { orchestrator.run_pass(request).await.outcome }
            })
            .await;
    });

    let mut sync_requests = signal_handler.sync_requests();
    let shutdown = signal_handler.shutdown().wait();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            requested = sync_requests.next() => {
                if !requested {
                    break;
                }
                for filter in FLOWS {
                    if let Err(e) = scheduler_handle.request_pass(filter).await {
                        warn!(error = %e, flow = %filter, "Failed to request pass");
                    }
                }
            }
        }
    }

    info!("Shutting down...");
    if let Err(e) = scheduler_handle.stop().await {
        warn!(error = %e, "Failed to send stop command to scheduler");
    }

    // Stop aborts running passes; wait for the loop to wind down
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_task).await;

    info!("Daemon stopped");
    Ok(())
}
