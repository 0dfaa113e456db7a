//! The seam between the task engine and the Step Functions activity API.
//!
//! The engine only ever talks to [`ActivityCoordinator`]; production wires in
//! the AWS SDK adapter from [`crate::client`], tests wire in an in-memory
//! fake. Heartbeat errors carry their own type because the engine reacts to
//! the fatal/transient split, not to individual service codes.

use async_trait::async_trait;
use thiserror::Error;

/// One unit of work handed out by the coordinator.
///
/// The token authenticates every subsequent call about this task and must be
/// consumed exactly once by either a success or a failure report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub token: String,
    pub input: String,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The call was abandoned because its context was cancelled.
    #[error("request cancelled")]
    Cancelled,

    #[error("coordinator call failed: {0}")]
    Call(String),
}

/// Heartbeat outcomes, split along the only axis the engine cares about.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// The task is no longer ours (invalid token, task gone, or timed out).
    /// The command should be stopped.
    #[error("heartbeat fatal: {0}")]
    Fatal(String),

    /// Anything else; safe to retry on the next tick.
    #[error("heartbeat failed: {0}")]
    Transient(String),
}

/// The subset of the Step Functions activity protocol the worker uses.
#[async_trait]
pub trait ActivityCoordinator: Send + Sync {
    /// Register the activity, returning its ARN. Succeeds idempotently if
    /// the activity already exists.
    async fn create_activity(
        &self,
        name: &str,
        tags: &[(String, String)],
    ) -> Result<String, CoordinatorError>;

    /// Apply tags to an existing activity. Creation of a pre-existing
    /// activity does not reapply tags, so registration always follows up
    /// with this call.
    async fn tag_activity(
        &self,
        arn: &str,
        tags: &[(String, String)],
    ) -> Result<(), CoordinatorError>;

    /// Long-poll for a task. `Ok(None)` means the poll returned without
    /// work, which is routine.
    async fn get_activity_task(
        &self,
        arn: &str,
        worker_name: &str,
    ) -> Result<Option<WorkItem>, CoordinatorError>;

    async fn send_task_heartbeat(&self, token: &str) -> Result<(), HeartbeatError>;

    async fn send_task_success(&self, token: &str, output: &str) -> Result<(), CoordinatorError>;

    async fn send_task_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), CoordinatorError>;
}
