use anyhow::{Context, Result};
use async_trait::async_trait;
use cassandra_layer_core::{
    CommandRunner, ControlCommand, Database, DatabaseConfig, DatabaseError, ProcessHandle,
    ProcessId, STOP_STEP_TIMEOUT, StopLadder, SystemCommandRunner, Version,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Command line arguments of `bin/cassandra` for `version`.
///
/// `-f` keeps the server in the foreground; `-R` allows running as root and
/// is only understood by 3.0 and newer.
pub fn launch_args(version: &Version) -> Vec<String> {
    let mut args = Vec::with_capacity(2);
    if version.is_at_least(3, 0) {
        args.push("-R".to_string());
    }
    args.push("-f".to_string());
    args
}

/// Runs `bin/cassandra` and stops it with `kill`, escalating from SIGINT
/// to SIGKILL and finally to [`ProcessHandle::destroy`]
pub struct UnixDatabase {
    config: DatabaseConfig,
    runner: Arc<dyn CommandRunner>,
    process: Option<ProcessHandle>,
    stop_wait: Duration,
}

impl UnixDatabase {
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

    /// Override how long each stop step waits for the process to exit
    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.stop_wait = wait;
        self
    }

    fn executable(&self) -> PathBuf {
        self.config.working_directory.join("bin").join("cassandra")
    }
}

#[async_trait]
impl Database for UnixDatabase {
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

        let executable = self.executable();
        if !tokio::fs::try_exists(&executable).await.unwrap_or(false) {
            return Err(DatabaseError::ExecutableNotFound(executable).into());
        }
        make_executable(&executable).await?;

        let args = launch_args(&self.config.version);
        let command = std::iter::once(executable.display().to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        info!("Starting '{}' using: {}", self.config.name, command);

        let process = ProcessHandle::spawn(
            &executable,
            &args,
            &self.config.working_directory,
            &self.config.launch_environment(),
        )
        .map_err(|e| DatabaseError::LaunchFailed {
            command,
            source: e.into(),
        })?;

        self.process = Some(process.clone());
        Ok(process)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let pid = process.pid();
        let runner = self.runner.as_ref();
        let working_directory = self.config.working_directory.as_path();

        info!("Stopping '{}' (PID: {})", self.config.name, pid);
        let stopped = StopLadder::new(&process)
            .with_wait(self.stop_wait)
            .step(
                format!("kill -SIGINT {pid}"),
                send_signal(runner, "-SIGINT", pid, working_directory),
            )
            .step(
                format!("kill -SIGKILL {pid}"),
                send_signal(runner, "-SIGKILL", pid, working_directory),
            )
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

async fn send_signal(
    runner: &dyn CommandRunner,
    signal: &str,
    pid: ProcessId,
    working_directory: &Path,
) -> Result<bool> {
    let command = ControlCommand::new("kill", [signal.to_string(), pid.to_string()], working_directory);
    let code = runner
        .run(&command)
        .await
        .with_context(|| format!("Unable to run '{command}'"))?;
    Ok(code == Some(0))
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Unable to read permissions of '{}'", path.display()))?;
    let mut permissions = metadata.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o111);
        tokio::fs::set_permissions(path, permissions)
            .await
            .with_context(|| format!("Unable to make '{}' executable", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const SCRIPT: &str = "#!/bin/sh\n\
        echo \"INFO Starting listening for CQL clients on localhost/127.0.0.1:9042 (unencrypted)...\"\n\
        echo \"JVM_EXTRA_OPTS=$JVM_EXTRA_OPTS\"\n\
        echo \"INFO Startup complete\"\n\
        exec sleep 30\n";

    /// Records control commands and acts on the signals itself
    struct RecordingRunner {
        sigint_code: Option<i32>,
        deliver_sigint: bool,
        commands: Mutex<Vec<ControlCommand>>,
    }

    impl RecordingRunner {
        fn new(sigint_code: Option<i32>, deliver_sigint: bool) -> Arc<Self> {
            Arc::new(Self {
                sigint_code,
                deliver_sigint,
                commands: Mutex::new(Vec::new()),
            })
        }

        fn signals(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.args[0].clone())
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &ControlCommand) -> std::io::Result<Option<i32>> {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            self.commands.lock().unwrap().push(command.clone());
            let pid = Pid::from_raw(command.args[1].parse().unwrap());
            match command.args[0].as_str() {
                "-SIGINT" => {
                    if self.deliver_sigint {
                        let _ = signal::kill(pid, Signal::SIGINT);
                    }
                    Ok(self.sigint_code)
                }
                "-SIGKILL" => {
                    let _ = signal::kill(pid, Signal::SIGKILL);
                    Ok(Some(0))
                }
                other => panic!("unexpected signal {other}"),
            }
        }
    }

    // parallel tests forking while a script is open for writing make exec fail with ETXTBSY
    static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn working_directory() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin").join("cassandra"), SCRIPT).unwrap();
        dir
    }

    fn config(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig::builder()
            .name("cassandra-test")
            .working_directory(dir.path())
            .system_property("cassandra.ring_delay_ms", "100")
            .build()
            .unwrap()
    }

    #[test]
    fn test_launch_args() {
        assert_eq!(launch_args(&Version::parse("4.1.5").unwrap()), vec!["-R", "-f"]);
        assert_eq!(launch_args(&Version::parse("3.0").unwrap()), vec!["-R", "-f"]);
        assert_eq!(launch_args(&Version::parse("2.2.19").unwrap()), vec!["-f"]);
    }

    #[tokio::test]
    async fn test_start_sets_executable_bit_and_passes_jvm_options() {
        let _serial = SERIAL.lock().await;
        let dir = working_directory();
        let mut database = UnixDatabase::new(config(&dir));

        let process = database.start().await.unwrap();
        let collector = cassandra_layer_core::OutputCollector::attach(&process);

        let mode = std::fs::metadata(dir.path().join("bin").join("cassandra"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);

        let ready = cassandra_layer_core::wait_until(Duration::from_secs(5), || {
            Ok(collector.lines().len() >= 3)
        })
        .await
        .unwrap();
        assert!(ready);
        assert!(
            collector
                .lines()
                .contains(&"JVM_EXTRA_OPTS=-Dcassandra.ring_delay_ms=100".to_string())
        );
        assert!(database.process().is_some());

        process.destroy_forcibly();
        process.wait().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let _serial = SERIAL.lock().await;
        let dir = working_directory();
        let mut database = UnixDatabase::new(config(&dir));
        let process = database.start().await.unwrap();

        let error = database.start().await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::AlreadyStarted(_))
        ));

        process.destroy_forcibly();
        process.wait().await;
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = TempDir::new().unwrap();
        let mut database = UnixDatabase::new(config(&dir));

        let error = database.start().await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::ExecutableNotFound(_))
        ));
        assert!(error.to_string().contains("is not found"));
        assert!(database.process().is_none());
    }

    #[tokio::test]
    async fn test_failed_sigint_escalates_to_sigkill() {
        let _serial = SERIAL.lock().await;
        let dir = working_directory();
        let runner = RecordingRunner::new(Some(1), false);
        let mut database = UnixDatabase::with_runner(config(&dir), runner.clone())
            .with_stop_wait(Duration::from_secs(5));

        let process = database.start().await.unwrap();
        database.stop().await.unwrap();

        assert_eq!(runner.signals(), vec!["-SIGINT", "-SIGKILL"]);
        assert!(!process.is_alive());
        assert!(database.process().is_none());
    }

    #[tokio::test]
    async fn test_successful_sigint_never_sends_sigkill() {
        let _serial = SERIAL.lock().await;
        let dir = working_directory();
        let runner = RecordingRunner::new(Some(0), true);
        let mut database = UnixDatabase::with_runner(config(&dir), runner.clone())
            .with_stop_wait(Duration::from_secs(5));

        let process = database.start().await.unwrap();
        database.stop().await.unwrap();

        assert_eq!(runner.signals(), vec!["-SIGINT"]);
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_stop_falls_back_to_destroy() {
        let _serial = SERIAL.lock().await;
        let dir = working_directory();
        let runner = RecordingRunner::new(Some(1), false);

        struct Refusing(Arc<RecordingRunner>);

        #[async_trait]
        impl CommandRunner for Refusing {
            async fn run(&self, command: &ControlCommand) -> std::io::Result<Option<i32>> {
                self.0.commands.lock().unwrap().push(command.clone());
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "kill"))
            }
        }

        let mut database =
            UnixDatabase::with_runner(config(&dir), Arc::new(Refusing(runner.clone())))
                .with_stop_wait(Duration::from_secs(5));

        let process = database.start().await.unwrap();
        database.stop().await.unwrap();

        assert_eq!(runner.signals(), vec!["-SIGINT", "-SIGKILL"]);
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = working_directory();
        let runner = RecordingRunner::new(Some(0), true);
        let mut database = UnixDatabase::with_runner(config(&dir), runner.clone());

        database.stop().await.unwrap();
        assert!(runner.signals().is_empty());
    }
}
