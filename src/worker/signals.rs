//! Signal forwarding between the worker and the running child.
//!
//! Every forwardable signal delivered to the worker is re-sent to the child.
//! SIGTERM is the graceful-stop signal: the bridge records it, passes it on,
//! and hard-kills after a grace period chosen to fit inside common container
//! runtime stop timeouts. Cancellation of the task context (the coordinator
//! timed the task out) triggers the same sequence with a shorter grace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Signal streams reserved ahead of the child spawn, so that handler
/// installation failures surface before there is a child to manage.
pub struct PreparedSignalBridge {
    streams: ForwardStreams,
}

impl PreparedSignalBridge {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            streams: ForwardStreams::install()?,
        })
    }

    /// Attach the bridge to a started child.
    ///
    /// `task` is the per-task cancellation token: the bridge reacts to its
    /// cancellation and cancels it itself once a graceful stop has run its
    /// course.
    pub fn attach(
        self,
        pid: u32,
        task: CancellationToken,
        graceful_stop_grace: Duration,
        task_cancel_grace: Duration,
    ) -> SignalBridge {
        let graceful_stop = Arc::new(AtomicBool::new(false));
        let stop = CancellationToken::new();
        let handle = tokio::spawn(run(
            pid,
            task,
            stop.clone(),
            graceful_stop.clone(),
            graceful_stop_grace,
            task_cancel_grace,
            self.streams,
        ));
        SignalBridge {
            graceful_stop,
            stop,
            handle,
        }
    }
}

/// Forwards worker signals to a child PID for the duration of one task.
pub struct SignalBridge {
    graceful_stop: Arc<AtomicBool>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl SignalBridge {
    /// Detach after the child has exited. Returns whether a graceful stop
    /// was observed while the task ran.
    pub async fn finish(self) -> bool {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "signal bridge task failed");
        }
        self.graceful_stop.load(Ordering::SeqCst)
    }
}

struct ForwardStreams {
    term: tokio::signal::unix::Signal,
    hup: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    usr1: tokio::signal::unix::Signal,
    usr2: tokio::signal::unix::Signal,
}

impl ForwardStreams {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            hup: signal(SignalKind::hangup())?,
            int: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            usr1: signal(SignalKind::user_defined1())?,
            usr2: signal(SignalKind::user_defined2())?,
        })
    }
}

async fn run(
    pid: u32,
    task: CancellationToken,
    stop: CancellationToken,
    graceful_stop: Arc<AtomicBool>,
    graceful_stop_grace: Duration,
    task_cancel_grace: Duration,
    mut streams: ForwardStreams,
) {
    loop {
        // Biased so that a SIGTERM delivered together with task-context
        // cancellation (worker shutdown cancels both) is seen as the
        // graceful stop it is, with the full grace period.
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = streams.term.recv() => {
                tracing::info!(pid, "received SIGTERM, stopping command");
                graceful_stop.store(true, Ordering::SeqCst);
                terminate(pid, graceful_stop_grace, &stop).await;
                task.cancel();
                return;
            }
            _ = task.cancelled() => {
                // The task context died under the command, most likely a
                // heartbeat-detected timeout. Give the command a short
                // window to clean up.
                tracing::info!(pid, "task cancelled, stopping command");
                terminate(pid, task_cancel_grace, &stop).await;
                return;
            }
            _ = streams.hup.recv() => forward(pid, Signal::SIGHUP),
            _ = streams.int.recv() => forward(pid, Signal::SIGINT),
            _ = streams.quit.recv() => forward(pid, Signal::SIGQUIT),
            _ = streams.usr1.recv() => forward(pid, Signal::SIGUSR1),
            _ = streams.usr2.recv() => forward(pid, Signal::SIGUSR2),
        }
    }
}

/// Soft-terminate, wait out the grace period, then hard-kill. Child exit
/// (observed via `stop`) aborts the wait.
async fn terminate(pid: u32, grace: Duration, stop: &CancellationToken) {
    forward(pid, Signal::SIGTERM);
    tokio::select! {
        _ = stop.cancelled() => {}
        _ = tokio::time::sleep(grace) => {
            tracing::warn!(pid, grace_secs = grace.as_secs(), "grace period expired, killing command");
            forward(pid, Signal::SIGKILL);
        }
    }
}

fn forward(pid: u32, sig: Signal) {
    if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
        // ESRCH just means the child already exited.
        tracing::debug!(pid, signal = %sig, error = %e, "could not signal command");
    }
}
