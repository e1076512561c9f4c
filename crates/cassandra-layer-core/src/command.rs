use crate::output::LineConsumer;
use crate::process::ProcessHandle;
use crate::readiness::POLL_INTERVAL;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// A short-lived control command, e.g. `kill -SIGINT <pid>` or a stop script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub env: HashMap<String, String>,
}

impl ControlCommand {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(
        program: impl Into<String>,
        args: I,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(|s| s.to_string()).collect(),
            working_directory: working_directory.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs control commands to completion.
///
/// `Err` means the command could not be started at all; `Ok` carries its
/// exit code (`None` if it was killed by a signal).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ControlCommand) -> std::io::Result<Option<i32>>;
}

/// Runs control commands as child processes, forwarding their output to
/// `tracing` (stdout at info, stderr at error).
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &ControlCommand) -> std::io::Result<Option<i32>> {
        let program = command.program.clone();
        let out: Arc<dyn LineConsumer> = Arc::new(move |line: &str| info!("[{}] {}", program, line));
        let program = command.program.clone();
        let err: Arc<dyn LineConsumer> = Arc::new(move |line: &str| error!("[{}] {}", program, line));
        run_forwarding(command, out, err).await
    }
}

/// Run `command` to completion, handing its output lines to `out` and `err`
async fn run_forwarding(
    command: &ControlCommand,
    out: Arc<dyn LineConsumer>,
    err: Arc<dyn LineConsumer>,
) -> std::io::Result<Option<i32>> {
    let process = ProcessHandle::spawn(
        &command.program,
        &command.args,
        &command.working_directory,
        &command.env,
    )?;
    let _out = process.stdout().attach(out);
    let _err = process.stderr().attach(err);

    let exit = process.wait().await;
    // the readers may still hold the last lines the command printed
    tokio::time::sleep(POLL_INTERVAL).await;
    Ok(exit.code)
}
