use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use cassandra_layer_core::{
    CommandRunner, ControlCommand, Database, DatabaseConfig, DatabaseError, ProcessHandle,
    STOP_STEP_TIMEOUT, StopLadder, SystemCommandRunner, Version,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the PID file the launch scripts write into the working directory
pub const PID_FILE: &str = "cassandra.pid";

/// PowerShell and batch launchers for `bin/<script>`, in that order
pub fn script_commands(working_directory: &Path, script: &str, args: &[String]) -> Vec<ControlCommand> {
    let bin = working_directory.join("bin");
    let powershell = ["-ExecutionPolicy".to_string(), "Unrestricted".to_string()]
        .into_iter()
        .chain(std::iter::once(
            bin.join(format!("{script}.ps1")).display().to_string(),
        ))
        .chain(args.iter().cloned())
        .collect::<Vec<_>>();
    let batch = std::iter::once("/c".to_string())
        .chain(std::iter::once(
            bin.join(format!("{script}.bat")).display().to_string(),
        ))
        .chain(args.iter().cloned())
        .collect::<Vec<_>>();
    vec![
        ControlCommand::new("powershell", powershell, working_directory),
        ControlCommand::new("cmd", batch, working_directory),
    ]
}

/// Arguments of the `cassandra` launch scripts for `version`
pub fn launch_args(pid_file: &Path, version: &Version) -> Vec<String> {
    let mut args = vec!["-p".to_string(), pid_file.display().to_string(), "-f".to_string()];
    if version.is_at_least(2, 1) {
        args.push("-a".to_string());
    }
    args
}

// the launcher is the script path argument of a script command
fn script_path(command: &ControlCommand) -> Option<&str> {
    match command.program.as_str() {
        "powershell" => command.args.get(2).map(String::as_str),
        "cmd" => command.args.get(1).map(String::as_str),
        _ => None,
    }
}

fn available(commands: Vec<ControlCommand>) -> Vec<ControlCommand> {
    commands
        .into_iter()
        .filter(|c| script_path(c).is_some_and(|p| Path::new(p).is_file()))
        .collect()
}

fn both_failed(first: anyhow::Error, command: &ControlCommand, second: anyhow::Error) -> anyhow::Error {
    first.context(format!("Fallback '{command}' failed too: {second}"))
}

/// Runs the PowerShell or batch launch scripts and stops them with the
/// `stop-server` scripts and `taskkill`
pub struct WindowsDatabase {
    config: DatabaseConfig,
    runner: Arc<dyn CommandRunner>,
    process: Option<ProcessHandle>,
    stop_wait: Duration,
}

impl WindowsDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemCommandRunner))
    }

    pub fn with_runner(config: DatabaseConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            process: None,
            stop_wait: STOP_STEP_TIMEOUT,
        }
    }

    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.stop_wait = wait;
        self
    }

    pub fn pid_file(&self) -> PathBuf {
        self.config.working_directory.join(PID_FILE)
    }

    /// Launch commands for this instance, whether or not the scripts exist
    pub fn launch_commands(&self) -> Vec<ControlCommand> {
        let args = launch_args(&self.pid_file(), &self.config.version);
        script_commands(&self.config.working_directory, "cassandra", &args)
    }

    #[cfg(test)]
    fn with_process(mut self, process: ProcessHandle) -> Self {
        self.process = Some(process);
        self
    }

    /// Run a `stop-server` script, falling back to the batch variant only
    /// when PowerShell could not be started
    async fn stop_script(&self, force: bool) -> Result<bool> {
        let mut args = vec!["-p".to_string(), self.pid_file().display().to_string()];
        if force {
            args.push("-f".to_string());
        }
        let commands = available(script_commands(
            &self.config.working_directory,
            "stop-server",
            &args,
        ));
        let mut commands = commands.into_iter();
        let first = commands
            .next()
            .ok_or_else(|| anyhow!("No stop-server script in '{}'", self.config.working_directory.display()))?;

        let first_error = match self.runner.run(&first).await {
            Ok(code) => return Ok(code == Some(0)),
            Err(e) => anyhow::Error::new(e).context(format!("Unable to run '{first}'")),
        };
        let Some(second) = commands.next() else {
            return Err(first_error);
        };
        debug!("Falling back to '{}': {:#}", second, first_error);
        match self.runner.run(&second).await {
            Ok(code) => Ok(code == Some(0)),
            Err(e) => Err(both_failed(first_error, &second, e.into())),
        }
    }

    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let mut args = Vec::with_capacity(4);
        if force {
            args.push("/F".to_string());
        }
        args.extend(["/T".to_string(), "/PID".to_string(), pid.to_string()]);
        let command = ControlCommand::new("taskkill", args, &self.config.working_directory);
        let code = self
            .runner
            .run(&command)
            .await
            .with_context(|| format!("Unable to run '{command}'"))?;
        Ok(code == Some(0))
    }
}

#[async_trait]
impl Database for WindowsDatabase {
    fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    async fn start(&mut self) -> Result<ProcessHandle> {
        if self.process.is_some() {
            return Err(DatabaseError::AlreadyStarted(self.config.name.clone()).into());
        }

        let commands = available(self.launch_commands());
        if commands.is_empty() {
            let executable = self
                .config
                .working_directory
                .join("bin")
                .join("cassandra.bat");
            return Err(DatabaseError::ExecutableNotFound(executable).into());
        }

        let env = self.config.launch_environment();
        let mut first_error: Option<anyhow::Error> = None;
        for command in commands {
            info!("Starting '{}' using: {}", self.config.name, command);
            match ProcessHandle::spawn(
                &command.program,
                &command.args,
                &self.config.working_directory,
                &env,
            ) {
                Ok(process) => {
                    self.process = Some(process.clone());
                    return Ok(process);
                }
                Err(e) => {
                    let error: anyhow::Error = DatabaseError::LaunchFailed {
                        command: command.to_string(),
                        source: e.into(),
                    }
                    .into();
                    match first_error.take() {
                        None => {
                            debug!("{:#}", error);
                            first_error = Some(error);
                        }
                        Some(first) => {
                            return Err(both_failed(first, &command, error));
                        }
                    }
                }
            }
        }
        Err(first_error.unwrap_or_else(|| anyhow!("No launcher for '{}'", self.config.name)))
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let pid = process.pid();

        info!("Stopping '{}' (PID: {})", self.config.name, pid);
        let stopped = StopLadder::new(&process)
            .with_wait(self.stop_wait)
            .step("stop-server", self.stop_script(false))
            .step(format!("taskkill /T /PID {pid}"), self.taskkill(pid, false))
            .step("stop-server -f", self.stop_script(true))
            .step(format!("taskkill /F /T /PID {pid}"), self.taskkill(pid, true))
            .step("destroy()", async {
                process.destroy();
                Ok(true)
            })
            .run()
            .await;

        if !stopped {
            warn!(
                "'{}' (PID: {}) is still alive after every stop attempt",
                self.config.name, pid
            );
            process.destroy();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn config(dir: &Path, version: &str) -> DatabaseConfig {
        DatabaseConfig::builder()
            .name("cassandra-test")
            .version(Version::parse(version).unwrap())
            .working_directory(dir)
            .build()
            .unwrap()
    }

    fn write_scripts(dir: &Path, names: &[&str]) {
        std::fs::create_dir_all(dir.join("bin")).unwrap();
        for name in names {
            std::fs::write(dir.join("bin").join(name), "").unwrap();
        }
    }

    #[test]
    fn test_launch_commands() {
        let dir = TempDir::new().unwrap();
        let database = WindowsDatabase::new(config(dir.path(), "4.0.11"));
        let pid_file = dir.path().join(PID_FILE).display().to_string();

        let commands = database.launch_commands();
        assert_eq!(commands.len(), 2);

        assert_eq!(commands[0].program, "powershell");
        assert_eq!(
            commands[0].args,
            vec![
                "-ExecutionPolicy".to_string(),
                "Unrestricted".to_string(),
                dir.path().join("bin").join("cassandra.ps1").display().to_string(),
                "-p".to_string(),
                pid_file.clone(),
                "-f".to_string(),
                "-a".to_string(),
            ]
        );

        assert_eq!(commands[1].program, "cmd");
        assert_eq!(
            commands[1].args,
            vec![
                "/c".to_string(),
                dir.path().join("bin").join("cassandra.bat").display().to_string(),
                "-p".to_string(),
                pid_file,
                "-f".to_string(),
                "-a".to_string(),
            ]
        );
    }

    #[test]
    fn test_old_versions_do_not_pass_a() {
        let args = launch_args(Path::new("cassandra.pid"), &Version::parse("2.0.17").unwrap());
        assert_eq!(args, vec!["-p", "cassandra.pid", "-f"]);
    }

    #[tokio::test]
    async fn test_missing_scripts() {
        let dir = TempDir::new().unwrap();
        let mut database = WindowsDatabase::new(config(dir.path(), "4.1.5"));

        let error = database.start().await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::ExecutableNotFound(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_both_launchers_failing_reports_first() {
        let dir = TempDir::new().unwrap();
        write_scripts(dir.path(), &["cassandra.ps1", "cassandra.bat"]);
        let mut database = WindowsDatabase::new(config(dir.path(), "4.1.5"));

        let error = database.start().await.unwrap_err();
        match error.downcast_ref::<DatabaseError>() {
            Some(DatabaseError::LaunchFailed { command, .. }) => {
                assert!(command.starts_with("powershell"), "{command}")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(format!("{error:#}").contains("cmd /c"));
        assert!(database.process().is_none());
    }

    struct RecordingRunner {
        process: ProcessHandle,
        unavailable: Vec<&'static str>,
        commands: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &ControlCommand) -> std::io::Result<Option<i32>> {
            self.commands.lock().unwrap().push(command.to_string());
            if self.unavailable.contains(&command.program.as_str()) {
                return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
            }
            if command.program == "taskkill" && command.args.first().map(String::as_str) == Some("/F") {
                self.process.destroy_forcibly();
                return Ok(Some(0));
            }
            Ok(Some(1))
        }
    }

    #[cfg(unix)]
    fn spawn_sleep() -> ProcessHandle {
        ProcessHandle::spawn(
            "sh",
            &["-c".to_string(), "exec sleep 30".to_string()],
            &std::env::temp_dir(),
            &Default::default(),
        )
        .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_ladder_order() {
        let dir = TempDir::new().unwrap();
        write_scripts(dir.path(), &["stop-server.ps1", "stop-server.bat"]);
        let process = spawn_sleep();
        let pid = process.pid();
        let runner = Arc::new(RecordingRunner {
            process: process.clone(),
            unavailable: vec![],
            commands: Mutex::new(Vec::new()),
        });

        let mut database = WindowsDatabase::with_runner(config(dir.path(), "4.1.5"), runner.clone())
            .with_stop_wait(Duration::from_millis(200))
            .with_process(process.clone());
        database.stop().await.unwrap();

        let commands = runner.commands.lock().unwrap().clone();
        let programs: Vec<&str> = commands
            .iter()
            .map(|c| c.split(' ').next().unwrap())
            .collect();
        assert_eq!(programs, vec!["powershell", "taskkill", "powershell", "taskkill"]);
        assert!(commands[0].ends_with(&format!("-p {}", database.pid_file().display())));
        assert_eq!(commands[1], format!("taskkill /T /PID {pid}"));
        assert!(commands[2].ends_with(" -f"));
        assert_eq!(commands[3], format!("taskkill /F /T /PID {pid}"));
        assert!(!process.is_alive());
        assert!(database.process().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_script_falls_back_to_batch() {
        let dir = TempDir::new().unwrap();
        write_scripts(dir.path(), &["stop-server.ps1", "stop-server.bat"]);
        let process = spawn_sleep();
        let runner = Arc::new(RecordingRunner {
            process: process.clone(),
            unavailable: vec!["powershell"],
            commands: Mutex::new(Vec::new()),
        });

        let mut database = WindowsDatabase::with_runner(config(dir.path(), "4.1.5"), runner.clone())
            .with_stop_wait(Duration::from_millis(200))
            .with_process(process.clone());
        database.stop().await.unwrap();

        let commands = runner.commands.lock().unwrap().clone();
        assert!(commands[0].starts_with("powershell"));
        assert!(commands[1].starts_with("cmd /c"));
        assert!(commands[2].starts_with("taskkill /T"));
        assert!(!process.is_alive());
    }
}
