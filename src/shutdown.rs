//! Worker shutdown signalling.
//!
//! SIGTERM and SIGINT stop the poll loop. A task already in flight is not
//! abandoned: the signal bridge forwards the same signal to the running
//! command, and the poll loop exits only after that task's terminal report.
//! The token returned here therefore means "stop acquiring work", not
//! "stop working".

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancelled once the worker should stop polling for new tasks.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        // Keep draining: signals of one kind coalesce, and repeats arriving
        // while the current task finishes its report should be answered,
        // not dropped.
        loop {
            let received = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            if handler.is_cancelled() {
                tracing::warn!(
                    signal = received,
                    "shutdown already in progress, waiting for the current task to report"
                );
            } else {
                tracing::info!(signal = received, "stopping the poll loop");
                handler.cancel();
            }
        }
    });

    token
}
