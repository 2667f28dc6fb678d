//! Child process supervisor.
//!
//! Spawns the child server with:
//! - stdin, stdout, and stderr all piped;
//! - `kill_on_drop(true)` so an abandoned handle never leaks a process;
//! - optional environment isolation: with `env_allowlist` set, the inherited
//!   environment is cleared and only the listed variables pass through;
//! - no console window on Windows.
//!
//! Liveness is polled with `try_wait`, which never blocks. Termination asks
//! politely first (SIGTERM on unix; the caller has already closed stdin) and
//! kills the process once the grace period runs out.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::{AppError, Result};

/// Handle to a running child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    program: String,
}

/// A freshly spawned child with its captured stdio streams.
#[derive(Debug)]
pub struct SpawnedChild {
    /// Process handle, kept alive so `kill_on_drop` works.
    pub process: ChildProcess,
    /// Child's stdin, for framed requests.
    pub stdin: ChildStdin,
    /// Child's stdout, for framed responses.
    pub stdout: ChildStdout,
    /// Child's stderr, for diagnostics.
    pub stderr: ChildStderr,
}

/// Spawn the child described by `config`.
///
/// # Errors
///
/// - `AppError::Launch("command is empty")`: nothing to run.
/// - `AppError::Launch("failed to spawn …")`: OS spawn failure (missing
///   executable, permission denied, bad working directory).
/// - `AppError::Launch("failed to capture …")`: a stdio pipe is missing.
pub fn spawn(config: &ServerConfig) -> Result<SpawnedChild> {
    let Some((program, args)) = config.command.split_first() else {
        return Err(AppError::Launch("command is empty".into()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args);

    if let Some(allowlist) = &config.env_allowlist {
        cmd.env_clear();
        for key in allowlist {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
    }
    cmd.envs(&config.env);

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("failed to spawn {program}: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture child stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture child stderr".into()))?;

    let pid = child.id();
    info!(program = program.as_str(), pid = pid.unwrap_or(0), "child process spawned");

    Ok(SpawnedChild {
        process: ChildProcess {
            child,
            pid,
            program: program.clone(),
        },
        stdin,
        stdout,
        stderr,
    })
}

impl ChildProcess {
    /// OS process id captured at spawn time.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check.
    ///
    /// Returns `false` once the process has exited for any reason, or if its
    /// status cannot be queried.
    pub fn is_running(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(program = self.program.as_str(), %status, "child process has exited");
                false
            }
            Err(err) => {
                warn!(program = self.program.as_str(), %err, "failed to poll child process status");
                false
            }
        }
    }

    /// Terminate the process, waiting up to `grace` before killing it.
    ///
    /// Returns the exit status if one could be collected.
    pub async fn terminate(mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        self.request_termination();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(program = self.program.as_str(), %status, "child process stopped");
                return Some(status);
            }
            Ok(Err(err)) => {
                warn!(program = self.program.as_str(), %err, "error waiting for child process");
            }
            Err(_elapsed) => {
                warn!(
                    program = self.program.as_str(),
                    ?grace,
                    "child ignored terminate request, killing"
                );
            }
        }

        if let Err(err) = self.child.kill().await {
            warn!(program = self.program.as_str(), %err, "failed to kill child process");
        }
        self.child.try_wait().ok().flatten()
    }

    #[cfg(unix)]
    fn request_termination(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(pid, %err, "SIGTERM delivery failed");
        }
    }

    #[cfg(not(unix))]
    #[allow(clippy::unused_self)]
    fn request_termination(&self) {
        // Closing stdin is the only polite request available here.
    }
}
