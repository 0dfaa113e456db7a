//! Top-level poll loop.
//!
//! Registers the activity, then polls for tasks until the main context is
//! cancelled. Tasks run one at a time: each acquired work item gets a child
//! cancellation token, a heartbeat loop, and a synchronous run of the task
//! runner. The coordinator's long poll returns every minute or so with an
//! empty token, so an outer loop with a one-per-second rate limit wraps it.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::coordinator::ActivityCoordinator;
use crate::error::Result;
use crate::metrics::{MetricsSink, UtilizationReporter};
use crate::worker::heartbeat::heartbeat_loop;
use crate::worker::runner::TaskRunner;

/// Owns one activity registration and the loop that feeds its tasks to the
/// runner.
pub struct ActivityPoller {
    coordinator: Arc<dyn ActivityCoordinator>,
    metrics: Arc<dyn MetricsSink>,
    config: WorkerConfig,
    tags: Vec<(String, String)>,
}

impl ActivityPoller {
    pub fn new(
        coordinator: Arc<dyn ActivityCoordinator>,
        metrics: Arc<dyn MetricsSink>,
        config: WorkerConfig,
        tags: Vec<(String, String)>,
    ) -> Self {
        Self {
            coordinator,
            metrics,
            config,
            tags,
        }
    }

    /// Register the activity and poll until `shutdown` fires.
    ///
    /// Returns an error only for registration failures; poll errors are
    /// logged and retried.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let arn = self.register().await?;
        tracing::info!(
            activity = %arn,
            worker_name = %self.config.worker_name,
            work_directory = ?self.config.work_directory,
            "startup"
        );

        let utilization = UtilizationReporter::new(self.metrics.clone(), arn.clone());
        tokio::spawn(
            utilization
                .clone()
                .run(shutdown.clone(), self.config.metrics_interval),
        );

        let runner = TaskRunner::new(self.coordinator.clone(), &self.config);

        // Token bucket of capacity 1, refilling once per poll interval.
        let mut limiter = tokio::time::interval(self.config.poll_interval);
        limiter.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !shutdown.is_cancelled() {
            utilization.set_active(false);
            // Time blocked on the limiter is neither busy nor idle; leave
            // it out of the utilization window.
            utilization.set_paused(true);
            let limited = tokio::select! {
                _ = shutdown.cancelled() => false,
                _ = limiter.tick() => true,
            };
            utilization.set_paused(false);
            if !limited {
                break;
            }

            tracing::trace!(activity = %arn, worker_name = %self.config.worker_name, "getactivitytask-start");
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = self
                    .coordinator
                    .get_activity_task(&arn, &self.config.worker_name) => polled,
            };
            let item = match polled {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::debug!("getactivitytask-skip");
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "getactivitytask-error");
                    continue;
                }
            };

            utilization.set_active(true);
            tracing::trace!(token = %item.token, input = %item.input, "getactivitytask");

            // Everything about this task hangs off one child token: the
            // heartbeat cancels it on fatal responses, the signal bridge
            // watches it, and cancelling it here releases the heartbeat.
            let task = shutdown.child_token();
            let heartbeat = tokio::spawn(heartbeat_loop(
                self.coordinator.clone(),
                item.token.clone(),
                task.clone(),
                self.config.heartbeat_interval,
            ));

            if let Err(failure) = runner.process(&task, &item).await {
                tracing::error!(error = %failure, "task-process-error");
            }
            task.cancel();
            let _ = heartbeat.await;
        }

        tracing::info!("getactivitytask-stop");
        Ok(())
    }

    /// Create the activity and apply tags.
    ///
    /// Creation is idempotent but does not reapply tags to a pre-existing
    /// activity, so tagging is always an explicit second call.
    async fn register(&self) -> Result<String> {
        let arn = self
            .coordinator
            .create_activity(&self.config.activity_name, &self.tags)
            .await?;
        self.coordinator.tag_activity(&arn, &self.tags).await?;
        Ok(arn)
    }
}

/// Activity tags sourced from the deployment environment; empty variables
/// are skipped.
pub fn tags_from_env() -> Vec<(String, String)> {
    let sources = [
        ("_DEPLOY_ENV", "environment"),
        ("_APP_NAME", "application"),
        ("_POD_ID", "pod"),
        ("_POD_SHORTNAME", "pod-shortname"),
        ("_POD_REGION", "pod-region"),
        ("_POD_ACCOUNT", "pod-account"),
        ("_TEAM_OWNER", "team"),
    ];
    sources
        .iter()
        .filter_map(|(var, key)| match std::env::var(var) {
            Ok(value) if !value.is_empty() => Some((key.to_string(), value)),
            _ => None,
        })
        .collect()
}
