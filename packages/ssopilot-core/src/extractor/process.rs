//! Handle on the spawned authorization CLI.

use crate::config::BackoffPolicy;
use crate::error::{LoginError, LoginResult};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// How long a terminated CLI gets before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// How long output drainers get to finish after the child is gone.
const DRAIN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The running `aws sso login` process and its output drainers.
///
/// The child is killed if this handle is dropped while it still runs.
#[derive(Debug)]
pub struct LoginProcess {
    program: String,
    child: Child,
    stderr_task: Option<JoinHandle<()>>,
    stdout_task: Option<JoinHandle<()>>,
    terminated: bool,
    exit_status: Option<ExitStatus>,
}

impl LoginProcess {
    /// Spawn `program args...` with piped output. Stderr starts draining
    /// into the debug log right away; stdout is handed back to the caller.
    pub fn spawn(program: &str, args: &[String]) -> LoginResult<(Self, ChildStdout)> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LoginError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| LoginError::Spawn {
            program: program.to_string(),
            source: std::io::Error::other("stdout not captured"),
        })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("CLI stderr: {}", line);
                }
            })
        });

        tracing::debug!("Spawned '{}' (pid {:?})", program, child.id());

        Ok((
            Self {
                program: program.to_string(),
                child,
                stderr_task,
                stdout_task: None,
                terminated: false,
                exit_status: None,
            },
            stdout,
        ))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Exit status if the child has already exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit_status = status,
                Err(e) => tracing::debug!("Failed to poll '{}': {}", self.program, e),
            }
        }
        self.exit_status
    }

    pub fn is_running(&mut self) -> bool {
        self.try_exit_status().is_none()
    }

    /// Keep reading the remaining stdout into the debug log.
    pub(crate) fn drain_stdout(&mut self, mut lines: Lines<BufReader<ChildStdout>>) {
        self.stdout_task = Some(tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!("CLI stdout: {}", line);
            }
        }));
    }

    /// Wait for the child to exit. Cancel-safe.
    pub async fn wait_exit(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Wait up to `grace` for the child to exit on its own, polling with
    /// `backoff`. Sends no signal.
    pub async fn reap(&mut self, grace: Duration, backoff: &BackoffPolicy) -> Option<ExitStatus> {
        let deadline = Instant::now() + grace;
        let mut attempt = 0;
        loop {
            if let Some(status) = self.try_exit_status() {
                return Some(status);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("'{}' still running after its output ended", self.program);
                return None;
            }
            attempt += 1;
            sleep(backoff.delay(attempt).min(deadline - now)).await;
        }
    }

    /// Terminate the child. Only the first call signals; later calls and
    /// calls after the child exited return `false`.
    pub async fn terminate(&mut self) -> bool {
        if self.terminated || !self.is_running() {
            return false;
        }
        self.terminated = true;

        tracing::info!("Terminating '{}'", self.program);
        self.send_terminate();

        match timeout(TERMINATE_GRACE, self.wait_exit()).await {
            Ok(Ok(status)) => tracing::debug!("'{}' exited: {}", self.program, status),
            Ok(Err(e)) => tracing::warn!("Failed to wait for '{}': {}", self.program, e),
            Err(_) => {
                tracing::warn!("'{}' ignored terminate, killing", self.program);
                if let Err(e) = self.child.kill().await {
                    tracing::warn!("Failed to kill '{}': {}", self.program, e);
                }
                self.exit_status = self.child.try_wait().ok().flatten();
            }
        }
        true
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) {
        match self.child.id() {
            Some(pid) => {
                // SAFETY: plain kill(2) on a pid we own and have not reaped
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc != 0 {
                    tracing::debug!(
                        "SIGTERM to {} failed: {}",
                        pid,
                        std::io::Error::last_os_error()
                    );
                }
            }
            None => tracing::debug!("'{}' already reaped", self.program),
        }
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!("Failed to stop '{}': {}", self.program, e);
        }
    }

    /// Join the output drainers. Drainers that outlive the child (a
    /// grandchild holding the pipe) are aborted.
    pub async fn finish(&mut self) {
        for task in [self.stdout_task.take(), self.stderr_task.take()].into_iter().flatten() {
            let abort = task.abort_handle();
            if timeout(DRAIN_JOIN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }
    }
}
