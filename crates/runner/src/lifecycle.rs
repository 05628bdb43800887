use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;

use pywarden_core::RunId;

/// How long forwarders may keep draining pipes once the child has exited.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A long-running child started by `spawn_long`.
///
/// When an output callback was supplied the pipes are owned by forwarder
/// tasks and `stdout`/`stderr` are `None`; otherwise the caller may take them.
#[derive(Debug)]
pub struct ProcessHandle {
    run_id: RunId,
    pid: Option<u32>,
    started_at: OffsetDateTime,
    child: Child,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub(crate) fn new(run_id: RunId, mut child: Child, forwarders: Vec<JoinHandle<()>>) -> Self {
        Self {
            run_id,
            pid: child.id(),
            started_at: OffsetDateTime::now_utc(),
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            forwarders,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Waits for exit, then gives forwarders a short grace period to flush
    /// whatever is still buffered in the pipes.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        // Close our end so children reading stdin see EOF.
        drop(self.stdin.take());
        let status = self.child.wait().await?;
        tracing::info!(run_id = %self.run_id, code = ?status.code(), "process exited");
        drain(&mut self.forwarders, DRAIN_GRACE).await;
        Ok(status)
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub async fn kill(&mut self) -> io::Result<()> {
        tracing::info!(run_id = %self.run_id, pid = ?self.pid, "killing process");
        self.child.kill().await?;
        drain(&mut self.forwarders, DRAIN_GRACE).await;
        Ok(())
    }
}

/// Awaits each unfinished task for at most `grace`, aborting stragglers
/// (a grandchild may still hold the pipe open).
pub(crate) async fn drain(tasks: &mut Vec<JoinHandle<()>>, grace: Duration) {
    for mut task in tasks.drain(..) {
        if task.is_finished() {
            continue;
        }
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::debug!("aborting output forwarder still attached to the pipe");
            task.abort();
        }
    }
}
