//! Per-task heartbeat loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::coordinator::{ActivityCoordinator, HeartbeatError};

/// Send one heartbeat immediately, then on a fixed interval until the task
/// context ends.
///
/// A fatal response (invalid token, task gone, task timed out) proves the
/// task is no longer ours; the loop cancels the task context so the runner
/// stops the command. Transient errors are logged and retried on the next
/// tick.
pub async fn heartbeat_loop(
    coordinator: Arc<dyn ActivityCoordinator>,
    token: String,
    task: CancellationToken,
    interval: Duration,
) {
    if beat(&*coordinator, &token, &task).await.is_err() {
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // immediate first tick; the beat above covered it
    loop {
        tokio::select! {
            _ = task.cancelled() => {
                tracing::trace!(token = %token, "heartbeat loop done");
                return;
            }
            _ = ticker.tick() => {
                if beat(&*coordinator, &token, &task).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// One heartbeat. `Err` means the loop must stop (the task context has been
/// cancelled on fatal responses).
async fn beat(
    coordinator: &dyn ActivityCoordinator,
    token: &str,
    task: &CancellationToken,
) -> Result<(), ()> {
    match coordinator.send_task_heartbeat(token).await {
        Ok(()) => {
            tracing::trace!("heartbeat sent");
            Ok(())
        }
        Err(HeartbeatError::Fatal(reason)) => {
            tracing::error!(error = %reason, "heartbeat fatal, cancelling task");
            task.cancel();
            Err(())
        }
        Err(HeartbeatError::Transient(reason)) => {
            // Should be investigated if it persists, but not worth failing
            // the task over.
            tracing::error!(error = %reason, "heartbeat failed, will retry");
            Ok(())
        }
    }
}
