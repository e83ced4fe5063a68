//! Unix signal handling for the daemon.
//!
//! - SIGTERM/SIGINT: Graceful shutdown
//! - SIGHUP: Run a sync pass of both flows now

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

/// Signal handler that manages Unix signal processing.
pub struct SignalHandler {
    /// Channel to signal shutdown.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Channel to receive shutdown signal.
    shutdown_rx: watch::Receiver<bool>,
    /// Number of sync requests so far.
    sync_tx: Arc<watch::Sender<u64>>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn install(
    kind: tokio::signal::unix::SignalKind,
    name: &str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            error!(error = %e, signal = name, "Failed to install signal handler");
            None
        }
    }
}

#[cfg(unix)]
async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(signal) => {
            signal.recv().await;
        }
        None => std::future::pending().await,
    }
}

impl SignalHandler {
    /// Creates a new signal handler.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sync_tx, _) = watch::channel(0);

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            sync_tx: Arc::new(sync_tx),
        }
    }

    /// Spawns the signal listener task.
    ///
    /// This should be called once at daemon startup.
    #[cfg(unix)]
    pub fn spawn_listener(&self) {
        use tokio::signal::unix::SignalKind;

        let shutdown_tx = self.shutdown_tx.clone();
        let sync_tx = self.sync_tx.clone();

        tokio::spawn(async move {
            let mut sigterm = install(SignalKind::terminate(), "SIGTERM");
            let mut sigint = install(SignalKind::interrupt(), "SIGINT");
            let mut sighup = install(SignalKind::hangup(), "SIGHUP");

            loop {
                tokio::select! {
                    _ = recv(&mut sigterm) => {
                        info!("Received SIGTERM, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    _ = recv(&mut sigint) => {
                        info!("Received SIGINT, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    _ = recv(&mut sighup) => {
                        info!("Received SIGHUP, requesting sync");
                        sync_tx.send_modify(|n| *n += 1);
                    }
                }
            }

            debug!("Signal listener stopped");
        });
    }

    /// Non-Unix implementation: only Ctrl+C is handled.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) {
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, initiating shutdown");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });
    }

    /// Returns a future that completes when a shutdown signal is received.
    pub fn shutdown(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.shutdown_rx.clone(),
        }
    }

    /// Returns a stream of sync requests made after this call.
    pub fn sync_requests(&self) -> SyncRequests {
        SyncRequests {
            rx: self.sync_tx.subscribe(),
        }
    }

    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Programmatically requests a sync.
    pub fn trigger_sync(&self) {
        self.sync_tx.send_modify(|n| *n += 1);
    }

    /// Creates a shutdown handle that can be passed to other components.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
            rx: self.shutdown_rx.clone(),
        }
    }
}

/// A signal that completes when shutdown is signaled.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal.
    pub async fn wait(mut self) {
        // Resolves when the flag is set, or when the sender is gone.
        let _ = self.rx.wait_for(|shutdown| *shutdown).await;
    }
}

/// Sync requests raised by SIGHUP or [`SignalHandler::trigger_sync`].
pub struct SyncRequests {
    rx: watch::Receiver<u64>,
}

impl SyncRequests {
    /// Waits for the next request. Returns false once the handler is gone.
    ///
    /// Requests raised while nobody was waiting are coalesced into one.
    pub async fn next(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// A handle for triggering or checking shutdown status.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// Triggers a shutdown.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns a future that completes when shutdown is triggered.
    pub fn wait(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.rx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_handler_shutdown() {
        let handler = SignalHandler::new();
        assert!(!handler.is_shutdown());

        handler.trigger_shutdown();
        assert!(handler.is_shutdown());
    }

    #[tokio::test]
    async fn sync_requests_are_coalesced() {
        let handler = SignalHandler::new();
        let mut requests = handler.sync_requests();

        handler.trigger_sync();
        handler.trigger_sync();
        assert!(requests.next().await);

        let pending = tokio::time::timeout(Duration::from_millis(20), requests.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn sync_requests_end_with_handler() {
        let handler = SignalHandler::new();
        let mut requests = handler.sync_requests();
        drop(handler);
        assert!(!requests.next().await);
    }

    #[tokio::test]
    async fn shutdown_signal_wait() {
        let handler = SignalHandler::new();
        let shutdown = handler.shutdown();

        let tx = handler.shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });

        let result = tokio::time::timeout(Duration::from_millis(100), shutdown.wait()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn shutdown_handle_wait() {
        let handler = SignalHandler::new();
        let handle = handler.shutdown_handle();

        let wait_handle = handle.clone();
        let wait_task = tokio::spawn(async move {
            wait_handle.wait().wait().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), wait_task).await;
        assert!(result.is_ok());
        assert!(result.unwrap().unwrap());
        assert!(handler.is_shutdown());
    }
}
