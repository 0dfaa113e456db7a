//! End-to-end processing of one activity task.
//!
//! The runner validates the task input, prepares the optional per-task work
//! directory, starts the command with a signal bridge attached, waits for it
//! to finish, classifies the outcome, and reports exactly one terminal
//! result to the coordinator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::coordinator::{ActivityCoordinator, CoordinatorError, WorkItem};
use crate::failure::{classify_exit, last_nonempty_line, truncate_with_marker, TaskFailure};
use crate::worker::child::spawn_child;
use crate::worker::signals::PreparedSignalBridge;

/// SendTaskFailure limit on `error`.
const MAX_ERROR_NAME_BYTES: usize = 256;
/// SendTaskFailure/SendTaskSuccess limit on `cause` and `output`.
const MAX_CAUSE_BYTES: usize = 32 * 1024;
const TRUNCATION_MARKER: &str = "[truncated]";

const EXECUTION_NAME_KEY: &str = "_EXECUTION_NAME";
const WORK_DIR_ENV: &str = "WORK_DIR";
const INPUT_FILE_NAME: &str = "input.json";

/// Runs the configured command once per task.
pub struct TaskRunner {
    coordinator: Arc<dyn ActivityCoordinator>,
    cmd: String,
    base_args: Vec<String>,
    work_directory: Option<PathBuf>,
    input_file: bool,
    graceful_stop_grace: Duration,
    task_cancel_grace: Duration,
}

impl TaskRunner {
    pub fn new(coordinator: Arc<dyn ActivityCoordinator>, config: &WorkerConfig) -> Self {
        Self {
            coordinator,
            cmd: config.cmd.clone(),
            base_args: config.cmd_args.clone(),
            work_directory: config.work_directory.clone(),
            input_file: config.input_file,
            graceful_stop_grace: config.graceful_stop_grace,
            task_cancel_grace: config.task_cancel_grace,
        }
    }

    /// Process one work item to a terminal report.
    ///
    /// Always emits exactly one of success or failure for the item's token
    /// before returning; the returned error is the failure that was already
    /// reported.
    pub async fn process(
        &self,
        task: &CancellationToken,
        item: &WorkItem,
    ) -> Result<(), TaskFailure> {
        let reporter = Reporter {
            coordinator: self.coordinator.clone(),
            token: item.token.clone(),
        };

        let input: Value = match serde_json::from_str(&item.input) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                return reporter
                    .fail(TaskFailure::TaskInputNotJson {
                        input: item.input.clone(),
                    })
                    .await;
            }
        };
        let execution_name = match input.get(EXECUTION_NAME_KEY).and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                return reporter
                    .fail(TaskFailure::TaskInputMissingExecutionName {
                        input: item.input.clone(),
                    })
                    .await;
            }
        };

        // Holds the directory for the whole task; dropped (and removed)
        // only after the terminal report below.
        let workdir = match &self.work_directory {
            Some(parent) => match TaskWorkDir::create(parent) {
                Ok(dir) => Some(dir),
                Err(e) => {
                    return reporter
                        .fail(TaskFailure::Unknown {
                            message: format!("could not create task work directory: {e}"),
                        })
                        .await;
                }
            },
            None => None,
        };

        // Normalized input lands either as the final positional argument or
        // in WORK_DIR/input.json.
        let normalized_input = input.to_string();
        let mut args = self.base_args.clone();
        if self.input_file {
            let Some(dir) = &workdir else {
                return reporter
                    .fail(TaskFailure::Unknown {
                        message: "input file mode requires a work directory".to_string(),
                    })
                    .await;
            };
            let input_path = dir.path().join(INPUT_FILE_NAME);
            if let Err(e) = tokio::fs::write(&input_path, &normalized_input).await {
                return reporter
                    .fail(TaskFailure::Unknown {
                        message: format!("could not write {}: {e}", input_path.display()),
                    })
                    .await;
            }
            args.push(input_path.to_string_lossy().into_owned());
        } else {
            args.push(normalized_input);
        }

        let mut env = vec![(EXECUTION_NAME_KEY.to_string(), execution_name.clone())];
        if let Some(dir) = &workdir {
            env.push((
                WORK_DIR_ENV.to_string(),
                dir.path().to_string_lossy().into_owned(),
            ));
        }

        // Reserve signal streams before the child exists so a failure here
        // leaves nothing running.
        let bridge = match PreparedSignalBridge::install() {
            Ok(prepared) => prepared,
            Err(e) => {
                return reporter
                    .fail(TaskFailure::Unknown {
                        message: format!("could not install signal handlers: {e}"),
                    })
                    .await;
            }
        };

        tracing::info!(cmd = %self.cmd, args = ?args, "exec-command");
        let child = match spawn_child(&self.cmd, &args, &env) {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return reporter
                    .fail(TaskFailure::CommandNotFound {
                        path: self.cmd.clone(),
                    })
                    .await;
            }
            Err(e) => {
                return reporter
                    .fail(TaskFailure::Unknown {
                        message: format!("could not start command: {e}"),
                    })
                    .await;
            }
        };
        let bridge = bridge.attach(
            child.pid(),
            task.clone(),
            self.graceful_stop_grace,
            self.task_cancel_grace,
        );

        let exit = child.wait().await;
        let graceful_stop = bridge.finish().await;
        let exit = match exit {
            Ok(exit) => exit,
            Err(e) => {
                return reporter
                    .fail(TaskFailure::Unknown {
                        message: format!("could not wait on command: {e}"),
                    })
                    .await;
            }
        };

        if let Some(failure) = classify_exit(&exit, graceful_stop) {
            return reporter.fail(failure).await;
        }

        let mut output = match last_nonempty_line(&exit.stdout_tail) {
            None => serde_json::Map::new(),
            Some(line) => match serde_json::from_str(line) {
                Ok(Value::Object(map)) => map,
                _ => {
                    return reporter
                        .fail(TaskFailure::TaskOutputNotJson {
                            output: line.to_string(),
                        })
                        .await;
                }
            },
        };
        // The worker's inbound guarantee overrides anything the command
        // wrote for this key.
        output.insert(
            EXECUTION_NAME_KEY.to_string(),
            Value::String(execution_name),
        );
        reporter
            .succeed(task, &Value::Object(output).to_string())
            .await;
        Ok(())
    }
}

/// Emits the terminal report for one task token.
struct Reporter {
    coordinator: Arc<dyn ActivityCoordinator>,
    token: String,
}

impl Reporter {
    /// Report a failure and hand it back as the task's error.
    ///
    /// Deliberately not raced against the task context: the reason for
    /// failing may itself be that the context died, and the report must
    /// still go out. A failed send is logged and swallowed.
    async fn fail(&self, failure: TaskFailure) -> Result<(), TaskFailure> {
        let name = truncate_with_marker(failure.name(), MAX_ERROR_NAME_BYTES, TRUNCATION_MARKER);
        let cause = truncate_with_marker(&failure.cause(), MAX_CAUSE_BYTES, TRUNCATION_MARKER);
        tracing::error!(name = %name, cause = %cause, "send-task-failure");
        if let Err(e) = self
            .coordinator
            .send_task_failure(&self.token, &name, &cause)
            .await
        {
            tracing::error!(error = %e, "send-task-failure failed");
        }
        Err(failure)
    }

    /// Report success, abandoning the call if the task context dies first.
    async fn succeed(&self, task: &CancellationToken, output: &str) {
        let send = self.coordinator.send_task_success(&self.token, output);
        let result = tokio::select! {
            _ = task.cancelled() => Err(CoordinatorError::Cancelled),
            result = send => result,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "send-task-success failed");
        }
    }
}

/// Unique per-task scratch directory, removed on drop.
struct TaskWorkDir {
    path: PathBuf,
}

impl TaskWorkDir {
    fn create(parent: &Path) -> std::io::Result<Self> {
        let path = parent.join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TaskWorkDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not remove task work directory");
        }
    }
}
