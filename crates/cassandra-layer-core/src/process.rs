use crate::output::{Output, OutputHold};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Unique identifier for a process
pub type ProcessId = u32;

/// How a managed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when the process was terminated by a signal or its
    /// status could not be collected
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

struct Inner {
    pid: ProcessId,
    command: String,
    exit: watch::Receiver<Option<ProcessExit>>,
    kill: mpsc::UnboundedSender<()>,
    stdout: Output,
    stderr: Output,
}

/// Handle to a running operating system process.
///
/// The child itself is owned by a reaper task which collects the exit status
/// as soon as the process ends, so liveness checks never block and exit
/// notifications are delivered regardless of who (if anyone) is waiting.
/// Handles are cheap to clone.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<Inner>,
}

impl ProcessHandle {
    /// Spawn `program` with `args` inside `working_dir`, adding `env` to the
    /// inherited environment. Both output streams are captured.
    pub fn spawn(
        program: impl AsRef<OsStr>,
        args: &[String],
        working_dir: &Path,
        env: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        let program = program.as_ref();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW
            cmd.creation_flags(0x08000000);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            std::io::Error::other(format!("'{}' exited before its PID was read", program.display()))
        })?;
        let command = std::iter::once(program.to_string_lossy().into_owned())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let stdout = match child.stdout.take() {
            Some(out) => Output::new(format!("{pid}:stdout"), out),
            None => Output::empty(format!("{pid}:stdout")),
        };
        let stderr = match child.stderr.take() {
            Some(err) => Output::new(format!("{pid}:stderr"), err),
            None => Output::empty(format!("{pid}:stderr")),
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, mut kill_rx) = mpsc::unbounded_channel::<()>();

        tokio::spawn(async move {
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    Some(()) = kill_rx.recv() => {
                        if let Err(e) = child.start_kill() {
                            debug!("Kill request for process {} failed: {}", pid, e);
                        }
                    }
                }
            };
            let exit = match status {
                Ok(status) => ProcessExit {
                    code: status.code(),
                },
                Err(e) => {
                    warn!("Failed to collect exit status of process {}: {}", pid, e);
                    ProcessExit { code: None }
                }
            };
            debug!("Process {} exited with {:?}", pid, exit.code);
            exit_tx.send_replace(Some(exit));
        });

        info!("Spawned process {} (PID: {})", command, pid);

        Ok(Self {
            inner: Arc::new(Inner {
                pid,
                command,
                exit: exit_rx,
                kill: kill_tx,
                stdout,
                stderr,
            }),
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.inner.pid
    }

    /// The command line this process was started with
    pub fn command(&self) -> &str {
        &self.inner.command
    }

    pub fn stdout(&self) -> &Output {
        &self.inner.stdout
    }

    pub fn stderr(&self) -> &Output {
        &self.inner.stderr
    }

    /// Postpone delivery on both outputs until the guards are dropped
    pub fn hold_output(&self) -> (OutputHold, OutputHold) {
        (self.inner.stdout.hold(), self.inner.stderr.hold())
    }

    /// Non-blocking liveness check
    pub fn is_alive(&self) -> bool {
        self.inner.exit.borrow().is_none() && self.inner.exit.has_changed().is_ok()
    }

    /// Exit code once the process has ended
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.exit.borrow().and_then(|exit| exit.code)
    }

    /// Wait for the process to exit
    pub async fn wait(&self) -> ProcessExit {
        self.on_exit().await
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// Returns `None` if the process is still running once the deadline has
    /// passed. The deadline is fixed when the call is made, and dropping the
    /// returned future loses nothing.
    pub async fn wait_for(&self, timeout: Duration) -> Option<ProcessExit> {
        let deadline = Instant::now() + timeout;
        let mut exit = self.inner.exit.clone();
        match tokio::time::timeout_at(deadline, exit.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => *value,
            // the reaper is gone together with the child it owned
            Ok(Err(_)) => Some(ProcessExit { code: None }),
            Err(_) => None,
        }
    }

    /// Resolves once the process has exited, however that happened
    pub fn on_exit(&self) -> impl Future<Output = ProcessExit> + Send + 'static {
        let mut exit = self.inner.exit.clone();
        async move {
            match exit.wait_for(Option::is_some).await {
                Ok(value) => value.unwrap_or(ProcessExit { code: None }),
                Err(_) => ProcessExit { code: None },
            }
        }
    }

    /// Ask the process to terminate (SIGTERM on Unix)
    pub fn destroy(&self) -> &Self {
        if !self.is_alive() {
            return self;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid as NixPid;

            match signal::kill(NixPid::from_raw(self.inner.pid as i32), Signal::SIGTERM) {
                Ok(()) => debug!("Sent SIGTERM to process {}", self.inner.pid),
                Err(nix::errno::Errno::ESRCH) => {
                    debug!("Process {} not found (already terminated)", self.inner.pid)
                }
                Err(e) => warn!("Failed to send SIGTERM to process {}: {}", self.inner.pid, e),
            }
        }

        #[cfg(not(unix))]
        {
            self.request_kill();
        }

        self
    }

    /// Kill the process (SIGKILL on Unix, TerminateProcess on Windows)
    pub fn destroy_forcibly(&self) -> &Self {
        if self.is_alive() {
            self.request_kill();
        }
        self
    }

    fn request_kill(&self) {
        if self.inner.kill.send(()).is_err() {
            debug!("Process {} has already been reaped", self.inner.pid);
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("command", &self.inner.command)
            .field("alive", &self.is_alive())
            .finish()
    }
}
