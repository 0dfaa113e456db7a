//! Child process launch and output capture.
//!
//! The child inherits the worker's environment (plus per-task additions),
//! gets an empty stdin, and has stdout/stderr echoed to the worker's own
//! stdout/stderr while the most recent 32 KiB of each is retained for the
//! task report. Killing is not wired to drop or cancellation here; the
//! signal bridge owns termination so the graceful-stop discipline applies.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Wire-protocol maximum for `cause` and `output` payloads.
pub const OUTPUT_TAIL_BYTES: usize = 32 * 1024;

/// A fixed-capacity byte tail: keeps the most recent `capacity` bytes.
#[derive(Debug)]
pub struct TailBuffer {
    capacity: usize,
    bytes: Vec<u8>,
}

impl TailBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bytes: Vec::new(),
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.capacity {
            self.bytes.clear();
            self.bytes
                .extend_from_slice(&chunk[chunk.len() - self.capacity..]);
            return;
        }
        let total = self.bytes.len() + chunk.len();
        if total > self.capacity {
            self.bytes.drain(..total - self.capacity);
        }
        self.bytes.extend_from_slice(chunk);
    }

    /// The retained tail as a string, with any torn leading UTF-8 sequence
    /// replaced.
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// How the child ended, plus the retained output tails.
#[derive(Debug)]
pub struct ChildExit {
    /// Exit code, if the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if the child died to one.
    pub signal: Option<i32>,
    pub stdout_tail: String,
    pub stderr_tail: String,
}

/// A started child whose output pumps are running.
#[derive(Debug)]
pub struct RunningChild {
    child: tokio::process::Child,
    pid: u32,
    stdout_pump: JoinHandle<TailBuffer>,
    stderr_pump: JoinHandle<TailBuffer>,
}

impl RunningChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the child to exit and both pumps to drain.
    pub async fn wait(self) -> std::io::Result<ChildExit> {
        let RunningChild {
            mut child,
            pid: _,
            stdout_pump,
            stderr_pump,
        } = self;
        let status = child.wait().await?;
        let stdout_tail = stdout_pump
            .await
            .map(TailBuffer::into_string)
            .unwrap_or_default();
        let stderr_tail = stderr_pump
            .await
            .map(TailBuffer::into_string)
            .unwrap_or_default();
        Ok(ChildExit {
            code: status.code(),
            signal: status.signal(),
            stdout_tail,
            stderr_tail,
        })
    }
}

/// Launch `path` with `args` and extra environment variables.
///
/// The returned error is the raw spawn error; the caller maps
/// `ErrorKind::NotFound` to its own failure category.
pub fn spawn_child(
    path: &str,
    args: &[String],
    env: &[(String, String)],
) -> std::io::Result<RunningChild> {
    let mut cmd = Command::new(path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| std::io::Error::other("child exited before its pid could be read"))?;

    let stdout = child.stdout.take().expect("child stdout requested piped");
    let stderr = child.stderr.take().expect("child stderr requested piped");
    let stdout_pump = tokio::spawn(pump(stdout, tokio::io::stdout(), OUTPUT_TAIL_BYTES));
    let stderr_pump = tokio::spawn(pump(stderr, tokio::io::stderr(), OUTPUT_TAIL_BYTES));

    Ok(RunningChild {
        child,
        pid,
        stdout_pump,
        stderr_pump,
    })
}

/// Copy `reader` to `echo` until EOF, teeing into a bounded tail.
async fn pump<R, W>(mut reader: R, mut echo: W, capacity: usize) -> TailBuffer
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut tail = TailBuffer::new(capacity);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend(&chunk[..n]);
                if echo.write_all(&chunk[..n]).await.is_ok() {
                    let _ = echo.flush().await;
                }
            }
        }
    }
    tail
}
