//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Everything the poll loop and task runner need, assembled by `main` from
/// CLI flags. Timing values are constants of the design, not exposed as
/// flags; they live here so tests can shorten them.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Activity name registered with Step Functions.
    pub activity_name: String,
    /// Worker identifier sent with every poll.
    pub worker_name: String,
    /// Command to run per task.
    pub cmd: String,
    /// Passthrough arguments placed before the input argument.
    pub cmd_args: Vec<String>,
    /// Parent directory for per-task work directories.
    pub work_directory: Option<PathBuf>,
    /// Deliver task input via `WORK_DIR/input.json` instead of an argument.
    pub input_file: bool,

    /// Minimum spacing between GetActivityTask calls.
    pub poll_interval: Duration,
    /// Spacing between task heartbeats.
    pub heartbeat_interval: Duration,
    /// Spacing between utilization metric reports.
    pub metrics_interval: Duration,
    /// How long a command gets between SIGTERM and SIGKILL on graceful
    /// stop. Kept below the 30 s stop timeout common to container runtimes.
    pub graceful_stop_grace: Duration,
    /// The abbreviated grace used when the coordinator cancels the task out
    /// from under the command.
    pub task_cancel_grace: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            activity_name: String::new(),
            worker_name: String::new(),
            cmd: String::new(),
            cmd_args: Vec::new(),
            work_directory: None,
            input_file: false,
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(20),
            metrics_interval: Duration::from_secs(60),
            graceful_stop_grace: Duration::from_secs(25),
            task_cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Expand `$VAR` and `${VAR}` references from the environment. Undefined
/// variables expand to the empty string.
pub fn expand_env(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            let start = i;
            while i < bytes.len() && bytes[i] != b'$' {
                i += 1;
            }
            out.push_str(&s[start..i]);
            continue;
        }
        if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            match s[i + 2..].find('}') {
                Some(end) => {
                    let name = &s[i + 2..i + 2 + end];
                    out.push_str(&std::env::var(name).unwrap_or_default());
                    i += 2 + end + 1;
                }
                None => {
                    // Unterminated brace; keep the rest literally.
                    out.push_str(&s[i..]);
                    break;
                }
            }
        } else {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end] == b'_' || bytes[end].is_ascii_alphanumeric()) {
                end += 1;
            }
            if end == start {
                out.push('$');
                i += 1;
            } else {
                out.push_str(&std::env::var(&s[start..end]).unwrap_or_default());
                i = end;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_both_reference_forms() {
        std::env::set_var("SFNCLI_TEST_ENV_A", "alpha");
        assert_eq!(expand_env("x-$SFNCLI_TEST_ENV_A-y"), "x-alpha-y");
        assert_eq!(expand_env("x-${SFNCLI_TEST_ENV_A}-y"), "x-alpha-y");
    }

    #[test]
    fn undefined_variables_expand_to_empty() {
        assert_eq!(expand_env("a${SFNCLI_TEST_ENV_UNSET}b"), "ab");
        assert_eq!(expand_env("a$SFNCLI_TEST_ENV_UNSET2"), "a");
    }

    #[test]
    fn literal_text_passes_through() {
        assert_eq!(expand_env("no refs here"), "no refs here");
        assert_eq!(expand_env("price: 5$"), "price: 5$");
        assert_eq!(expand_env("${unterminated"), "${unterminated");
    }
}
