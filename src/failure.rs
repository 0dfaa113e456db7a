//! Failure taxonomy for activity tasks.
//!
//! The States language identifies failures by short error names
//! (<https://states-language.net/spec.html#error-names>). sfncli reports a
//! closed set of `sfncli.*` names, plus custom names a command can emit on
//! its last stdout line as `{"error": "...", "cause": "..."}`.

use serde::Deserialize;

use crate::worker::child::ChildExit;

/// Why a task failed, paired with a human-readable cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure {
    /// The task input did not parse as a JSON object.
    TaskInputNotJson { input: String },
    /// The task input lacked a string `_EXECUTION_NAME` attribute.
    TaskInputMissingExecutionName { input: String },
    /// The configured command does not exist.
    CommandNotFound { path: String },
    /// The command exited with a non-zero status.
    CommandExitedNonzero { stderr: String },
    /// The command was killed by SIGKILL.
    CommandKilled { stderr: String },
    /// sfncli was asked to stop gracefully while the command ran.
    CommandTerminated { stderr: String },
    /// The command's final stdout line was not a JSON object.
    TaskOutputNotJson { output: String },
    /// A command-supplied error name and cause.
    Custom { error: String, cause: String },
    /// Anything not covered above.
    Unknown { message: String },
}

impl TaskFailure {
    /// The stable error name reported to Step Functions.
    pub fn name(&self) -> &str {
        match self {
            TaskFailure::TaskInputNotJson { .. } => "sfncli.TaskInputNotJSON",
            TaskFailure::TaskInputMissingExecutionName { .. } => {
                "sfncli.TaskInputMissingExecutionName"
            }
            TaskFailure::CommandNotFound { .. } => "sfncli.CommandNotFound",
            TaskFailure::CommandExitedNonzero { .. } => "sfncli.CommandExitedNonzero",
            TaskFailure::CommandKilled { .. } => "sfncli.CommandKilled",
            TaskFailure::CommandTerminated { .. } => "sfncli.CommandTerminated",
            TaskFailure::TaskOutputNotJson { .. } => "sfncli.TaskOutputNotJSON",
            TaskFailure::Custom { error, .. } => error,
            TaskFailure::Unknown { .. } => "sfncli.Unknown",
        }
    }

    /// The human-readable cause reported to Step Functions.
    pub fn cause(&self) -> String {
        match self {
            TaskFailure::TaskInputNotJson { input } => {
                format!("task input not valid JSON: '{input}'")
            }
            TaskFailure::TaskInputMissingExecutionName { input } => {
                format!("task input missing _EXECUTION_NAME attribute: '{input}'")
            }
            TaskFailure::CommandNotFound { path } => format!("command not found: '{path}'"),
            TaskFailure::CommandExitedNonzero { stderr }
            | TaskFailure::CommandKilled { stderr }
            | TaskFailure::CommandTerminated { stderr } => stderr.clone(),
            TaskFailure::TaskOutputNotJson { output } => {
                format!("stdout not valid JSON: '{output}'")
            }
            TaskFailure::Custom { cause, .. } => cause.clone(),
            TaskFailure::Unknown { message } => message.clone(),
        }
    }
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name(), self.cause())
    }
}

#[derive(Deserialize)]
struct CustomFailureLine {
    #[serde(default)]
    error: String,
    #[serde(default)]
    cause: String,
}

/// Parse a command-supplied failure from the last non-empty line of stdout.
///
/// The line must be a JSON object with a non-empty string `error` field; a
/// sibling string `cause` is optional.
pub fn parse_custom_failure(stdout: &str) -> Option<TaskFailure> {
    let line = last_nonempty_line(stdout)?;
    let parsed: CustomFailureLine = serde_json::from_str(line).ok()?;
    if parsed.error.is_empty() {
        return None;
    }
    Some(TaskFailure::Custom {
        error: parsed.error,
        cause: parsed.cause,
    })
}

/// The last newline-delimited, non-empty line of `s`.
pub fn last_nonempty_line(s: &str) -> Option<&str> {
    s.lines().rev().find(|line| !line.is_empty())
}

/// Classify a finished child process.
///
/// Returns `None` when the exit is a candidate for success (zero status, no
/// graceful stop observed); the runner then parses stdout for the output
/// payload. Precedence: graceful stop dominates everything, SIGKILL refuses
/// custom names (a killed process cannot have coherently flushed one), then
/// non-zero exits and deaths by other signals.
pub fn classify_exit(exit: &ChildExit, graceful_stop: bool) -> Option<TaskFailure> {
    let stderr = exit.stderr_tail.trim_end().to_string();
    if graceful_stop {
        return Some(
            parse_custom_failure(&exit.stdout_tail)
                .unwrap_or(TaskFailure::CommandTerminated { stderr }),
        );
    }
    if exit.signal == Some(nix::libc::SIGKILL) {
        return Some(TaskFailure::CommandKilled { stderr });
    }
    if exit.code != Some(0) {
        return Some(
            parse_custom_failure(&exit.stdout_tail)
                .unwrap_or(TaskFailure::CommandExitedNonzero { stderr }),
        );
    }
    None
}

/// Truncate `s` to at most `max_len` bytes, replacing the cut end with
/// `marker`. The cut point backs up to a UTF-8 boundary so the result is
/// always valid UTF-8.
pub fn truncate_with_marker(s: &str, max_len: usize, marker: &str) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut cut = max_len.saturating_sub(marker.len());
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &s[..cut], marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit(code: Option<i32>, signal: Option<i32>, stdout: &str, stderr: &str) -> ChildExit {
        ChildExit {
            code,
            signal,
            stdout_tail: stdout.to_string(),
            stderr_tail: stderr.to_string(),
        }
    }

    #[test]
    fn error_names_are_stable() {
        let cases = [
            (
                TaskFailure::TaskInputNotJson { input: "x".into() },
                "sfncli.TaskInputNotJSON",
            ),
            (
                TaskFailure::TaskInputMissingExecutionName { input: "x".into() },
                "sfncli.TaskInputMissingExecutionName",
            ),
            (
                TaskFailure::CommandNotFound { path: "x".into() },
                "sfncli.CommandNotFound",
            ),
            (
                TaskFailure::CommandExitedNonzero { stderr: "x".into() },
                "sfncli.CommandExitedNonzero",
            ),
            (
                TaskFailure::CommandKilled { stderr: "x".into() },
                "sfncli.CommandKilled",
            ),
            (
                TaskFailure::CommandTerminated { stderr: "x".into() },
                "sfncli.CommandTerminated",
            ),
            (
                TaskFailure::TaskOutputNotJson { output: "x".into() },
                "sfncli.TaskOutputNotJSON",
            ),
            (
                TaskFailure::Unknown { message: "x".into() },
                "sfncli.Unknown",
            ),
        ];
        for (failure, name) in cases {
            assert_eq!(failure.name(), name);
        }
    }

    #[test]
    fn input_causes_quote_the_raw_input() {
        let failure = TaskFailure::TaskInputNotJson {
            input: "notjson".into(),
        };
        assert_eq!(failure.cause(), "task input not valid JSON: 'notjson'");
    }

    #[test]
    fn custom_failure_parses_last_line() {
        let stdout = "progress 1\nprogress 2\n{\"error\":\"custom.x\",\"cause\":\"c\"}\n";
        assert_eq!(
            parse_custom_failure(stdout),
            Some(TaskFailure::Custom {
                error: "custom.x".into(),
                cause: "c".into()
            })
        );
    }

    #[test]
    fn custom_failure_requires_nonempty_error() {
        assert_eq!(parse_custom_failure("{\"cause\":\"c\"}\n"), None);
        assert_eq!(parse_custom_failure("{\"error\":\"\"}\n"), None);
        assert_eq!(parse_custom_failure("not json\n"), None);
        assert_eq!(parse_custom_failure(""), None);
    }

    #[test]
    fn custom_failure_cause_defaults_to_empty() {
        assert_eq!(
            parse_custom_failure("{\"error\":\"custom.x\"}"),
            Some(TaskFailure::Custom {
                error: "custom.x".into(),
                cause: String::new()
            })
        );
    }

    #[test]
    fn zero_exit_is_not_a_failure() {
        assert_eq!(classify_exit(&exit(Some(0), None, "{}", ""), false), None);
    }

    #[test]
    fn nonzero_exit_reports_trimmed_stderr() {
        assert_eq!(
            classify_exit(&exit(Some(10), None, "out", "stderr-msg\n"), false),
            Some(TaskFailure::CommandExitedNonzero {
                stderr: "stderr-msg".into()
            })
        );
    }

    #[test]
    fn nonzero_exit_prefers_custom_failure() {
        assert_eq!(
            classify_exit(
                &exit(Some(10), None, "{\"error\":\"custom.x\",\"cause\":\"c\"}", "e"),
                false
            ),
            Some(TaskFailure::Custom {
                error: "custom.x".into(),
                cause: "c".into()
            })
        );
    }

    #[test]
    fn sigkill_never_yields_custom_failure() {
        assert_eq!(
            classify_exit(
                &exit(
                    None,
                    Some(nix::libc::SIGKILL),
                    "{\"error\":\"custom.x\"}",
                    "tail\n"
                ),
                false
            ),
            Some(TaskFailure::CommandKilled {
                stderr: "tail".into()
            })
        );
    }

    #[test]
    fn graceful_stop_dominates_exit_status() {
        // Even a clean exit reports termination once graceful stop was seen.
        assert_eq!(
            classify_exit(&exit(Some(0), None, "", "tail"), true),
            Some(TaskFailure::CommandTerminated {
                stderr: "tail".into()
            })
        );
        // A SIGKILL after the grace period still reports termination.
        assert_eq!(
            classify_exit(&exit(None, Some(nix::libc::SIGKILL), "", "tail"), true),
            Some(TaskFailure::CommandTerminated {
                stderr: "tail".into()
            })
        );
    }

    #[test]
    fn graceful_stop_allows_custom_failure() {
        assert_eq!(
            classify_exit(
                &exit(Some(1), None, "{\"error\":\"custom.x\",\"cause\":\"foo\"}", ""),
                true
            ),
            Some(TaskFailure::Custom {
                error: "custom.x".into(),
                cause: "foo".into()
            })
        );
    }

    #[test]
    fn death_by_other_signal_classifies_as_nonzero() {
        assert_eq!(
            classify_exit(&exit(None, Some(nix::libc::SIGHUP), "", "tail"), false),
            Some(TaskFailure::CommandExitedNonzero {
                stderr: "tail".into()
            })
        );
    }

    #[test]
    fn truncate_short_strings_untouched() {
        assert_eq!(truncate_with_marker("hello", 256, "[truncated]"), "hello");
    }

    #[test]
    fn truncate_respects_limit_and_appends_marker() {
        let long = "a".repeat(300);
        let out = truncate_with_marker(&long, 256, "[truncated]");
        assert_eq!(out.len(), 256);
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn truncate_backs_up_to_utf8_boundary() {
        // "é" is two bytes; force the cut into the middle of one.
        let s = "é".repeat(200);
        let out = truncate_with_marker(&s, 256, "[truncated]");
        assert!(out.len() <= 256);
        assert!(std::str::from_utf8(out.as_bytes()).is_ok());
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn last_line_skips_trailing_blanks() {
        assert_eq!(
            last_nonempty_line("{\"a\":1}\n{\"task\":\"output\"}\n\n\n"),
            Some("{\"task\":\"output\"}")
        );
        assert_eq!(last_nonempty_line("\n\n"), None);
    }
}
