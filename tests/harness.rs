//! Shared fixtures for integration tests: an in-memory coordinator that
//! records every call, and helpers for writing executable test scripts.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sfncli::config::WorkerConfig;
use sfncli::coordinator::{ActivityCoordinator, CoordinatorError, HeartbeatError, WorkItem};

pub const TASK_TOKEN: &str = "taskToken";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    Success {
        token: String,
        output: String,
    },
    Failure {
        token: String,
        error: String,
        cause: String,
    },
}

/// Coordinator double: hands out queued work items, records reports.
#[derive(Default)]
pub struct MockCoordinator {
    pub work_items: Mutex<Vec<WorkItem>>,
    pub reports: Mutex<Vec<Report>>,
    pub heartbeats: Mutex<usize>,
    pub created: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub tagged: Mutex<Vec<(String, Vec<(String, String)>)>>,
    pub fail_create: Mutex<bool>,
}

impl MockCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn queue_task(&self, input: &str) {
        self.work_items.lock().unwrap().push(WorkItem {
            token: TASK_TOKEN.to_string(),
            input: input.to_string(),
        });
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub fn heartbeats(&self) -> usize {
        *self.heartbeats.lock().unwrap()
    }
}

#[async_trait]
impl ActivityCoordinator for MockCoordinator {
    async fn create_activity(
        &self,
        name: &str,
        tags: &[(String, String)],
    ) -> Result<String, CoordinatorError> {
        if *self.fail_create.lock().unwrap() {
            return Err(CoordinatorError::Call("activity limit exceeded".into()));
        }
        self.created
            .lock()
            .unwrap()
            .push((name.to_string(), tags.to_vec()));
        Ok(format!("arn:aws:states:::activity:{name}"))
    }

    async fn tag_activity(
        &self,
        arn: &str,
        tags: &[(String, String)],
    ) -> Result<(), CoordinatorError> {
        self.tagged
            .lock()
            .unwrap()
            .push((arn.to_string(), tags.to_vec()));
        Ok(())
    }

    async fn get_activity_task(
        &self,
        _arn: &str,
        _worker_name: &str,
    ) -> Result<Option<WorkItem>, CoordinatorError> {
        let mut items = self.work_items.lock().unwrap();
        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(items.remove(0)))
        }
    }

    async fn send_task_heartbeat(&self, _token: &str) -> Result<(), HeartbeatError> {
        *self.heartbeats.lock().unwrap() += 1;
        Ok(())
    }

    async fn send_task_success(&self, token: &str, output: &str) -> Result<(), CoordinatorError> {
        self.reports.lock().unwrap().push(Report::Success {
            token: token.to_string(),
            output: output.to_string(),
        });
        Ok(())
    }

    async fn send_task_failure(
        &self,
        token: &str,
        error: &str,
        cause: &str,
    ) -> Result<(), CoordinatorError> {
        self.reports.lock().unwrap().push(Report::Failure {
            token: token.to_string(),
            error: error.to_string(),
            cause: cause.to_string(),
        });
        Ok(())
    }
}

/// Write an executable shell script into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A config pointed at `cmd` with grace periods short enough for tests.
pub fn test_config(cmd: &str, cmd_args: Vec<String>) -> WorkerConfig {
    WorkerConfig {
        activity_name: "test-activity".to_string(),
        worker_name: "test-worker".to_string(),
        cmd: cmd.to_string(),
        cmd_args,
        poll_interval: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(50),
        metrics_interval: Duration::from_millis(100),
        graceful_stop_grace: Duration::from_secs(3),
        task_cancel_grace: Duration::from_secs(1),
        ..WorkerConfig::default()
    }
}
