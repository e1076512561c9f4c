use crate::config::CassandraConfig;
use crate::factory::PlatformDatabaseFactory;
use crate::shutdown::ShutdownHook;
use anyhow::{Context, anyhow};
use cassandra_layer_core::{
    CassandraError, Database, DatabaseConfig, DatabaseFactory, ErrorCollector,
    NativeTransportParser, OutputCollector, OutputLogger, POLL_INTERVAL, ProcessHandle,
    ReadinessError, STOP_STEP_TIMEOUT, Settings, StartupParser, TransportStatus, wait_until,
};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct State {
    database: Option<Box<dyn Database>>,
    output: Option<OutputLogger>,
    exit_watch: Option<CancellationToken>,
    hook: Option<ShutdownHook>,
}

pub(crate) struct CassandraInner {
    pub(crate) config: CassandraConfig,
    factory: Arc<dyn DatabaseFactory>,
    state: tokio::sync::Mutex<State>,
    settings: RwLock<Option<Arc<Settings>>>,
    process: Mutex<Option<ProcessHandle>>,
    running: AtomicBool,
}

impl CassandraInner {
    pub(crate) fn new(config: CassandraConfig) -> Self {
        let factory = match &config.database_factory {
            Some(factory) => factory.clone(),
            None => Arc::new(PlatformDatabaseFactory::new(&config)),
        };
        Self {
            config,
            factory,
            state: tokio::sync::Mutex::new(State::default()),
            settings: RwLock::new(None),
            process: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    fn instance(&self) -> String {
        format!("{} ({})", self.config.name, self.config.version)
    }

    fn process(&self) -> MutexGuard<'_, Option<ProcessHandle>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, settings: Option<Arc<Settings>>) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub(crate) fn settings(&self) -> Result<Arc<Settings>, CassandraError> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(CassandraError::NotStarted)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire) && self.process().as_ref().is_some_and(ProcessHandle::is_alive)
    }

    pub(crate) async fn start(self: &Arc<Self>) -> Result<(), CassandraError> {
        let mut state = self.state.lock().await;
        if state.database.is_some() {
            debug!("'{}' has already been started", self.config.name);
            return Ok(());
        }
        self.publish(None);
        info!(
            "Starting '{}' ({}) in '{}'",
            self.config.name,
            self.config.version,
            self.config.working_directory.display()
        );

        let mut database = match self.provision().await {
            Ok(database) => database,
            Err(e) => {
                let mut error = CassandraError::start_failed(self.instance(), e);
                if let Err(cleanup) = self.destroy_working_directory().await {
                    error.suppress(cleanup);
                }
                return Err(error);
            }
        };

        if self.config.register_shutdown_hook && state.hook.is_none() {
            match self.register_hook() {
                Ok(hook) => state.hook = Some(hook),
                Err(e) => warn!("{:#}", e),
            }
        }

        // the database joins the state only once the attempt has settled, so an
        // abandoned start leaves the supervisor stopped
        let config = database.config().clone();
        let process = match database.start().await {
            Ok(process) => process,
            Err(e) => {
                state.database = Some(database);
                return Err(self.abort_start(&mut state, e).await);
            }
        };
        let launch = LaunchGuard::new(&self.config.name, &process);

        // every observer must see the first line, so delivery waits until all are attached
        let hold = process.hold_output();
        state.output = Some(match &self.config.output_consumer {
            Some(consumer) => OutputLogger::attach_consumer(&process, consumer.clone()),
            None => OutputLogger::attach(&self.config.name, &process),
        });
        let readiness = Readiness::attach(&config, &process);
        drop(hold);

        let status = readiness
            .wait(&self.config.name, self.config.startup_timeout)
            .await;
        drop(readiness);
        launch.disarm();
        state.database = Some(database);

        match status {
            Ok(status) => {
                let settings = Arc::new(Settings::new(&config, status));
                info!(
                    "'{}' has been started (PID: {}), native transport: {:?}:{:?}",
                    self.config.name,
                    process.pid(),
                    settings.address(),
                    settings.port()
                );
                self.publish(Some(settings));
                *self.process() = Some(process.clone());
                self.running.store(true, Ordering::Release);
                state.exit_watch = Some(self.watch_exit(&process));
                Ok(())
            }
            Err(e) => Err(self.abort_start(&mut state, e).await),
        }
    }

    pub(crate) async fn stop(&self) -> Result<(), CassandraError> {
        let mut state = self.state.lock().await;
        if state.database.is_none() {
            debug!("'{}' is not running", self.config.name);
            return Ok(());
        }
        self.stop_locked(&mut state)
            .await
            .map_err(|e| CassandraError::stop_failed(self.instance(), e))
    }

    // the watcher is cancelled under the lock, so a cancelled watcher never
    // stops a later run
    async fn stop_after_exit(&self, watch: &CancellationToken) -> Result<(), CassandraError> {
        let mut state = self.state.lock().await;
        if watch.is_cancelled() || state.database.is_none() {
            return Ok(());
        }
        self.stop_locked(&mut state)
            .await
            .map_err(|e| CassandraError::stop_failed(self.instance(), e))
    }

    async fn provision(&self) -> anyhow::Result<Box<dyn Database>> {
        let working_directory = &self.config.working_directory;
        let version = &self.config.version;

        tokio::fs::create_dir_all(working_directory)
            .await
            .with_context(|| format!("Unable to create '{}'", working_directory.display()))?;
        self.config
            .working_directory_initializer
            .init(working_directory, version)
            .await
            .with_context(|| {
                format!(
                    "Unable to initialize working directory '{}'",
                    working_directory.display()
                )
            })?;
        for customizer in &self.config.working_directory_customizers {
            customizer
                .customize(working_directory, version)
                .await
                .with_context(|| {
                    format!(
                        "Unable to customize working directory '{}'",
                        working_directory.display()
                    )
                })?;
        }
        self.factory
            .create(working_directory)
            .context("Unable to create database")
    }

    async fn destroy_working_directory(&self) -> anyhow::Result<()> {
        let working_directory = &self.config.working_directory;
        self.config
            .working_directory_destroyer
            .destroy(working_directory, &self.config.version)
            .await
            .with_context(|| {
                format!(
                    "Unable to destroy working directory '{}'",
                    working_directory.display()
                )
            })
    }

    async fn abort_start(&self, state: &mut State, cause: anyhow::Error) -> CassandraError {
        let mut error = CassandraError::start_failed(self.instance(), cause);
        if let Err(cleanup) = self.stop_locked(state).await {
            error.suppress(cleanup);
        }
        error
    }

    async fn stop_locked(&self, state: &mut State) -> anyhow::Result<()> {
        let Some(mut database) = state.database.take() else {
            return Ok(());
        };
        if let Some(watch) = state.exit_watch.take() {
            watch.cancel();
        }
        self.running.store(false, Ordering::Release);

        info!("Stopping '{}'", self.config.name);
        let process = database.process().cloned();
        let mut result = database
            .stop()
            .await
            .with_context(|| format!("Unable to stop '{}'", self.config.name));
        if result.is_ok() {
            if let Some(process) = &process {
                if process.wait_for(STOP_STEP_TIMEOUT).await.is_none() {
                    result = Err(anyhow!(
                        "'{}' (PID: {}) is still alive",
                        self.config.name,
                        process.pid()
                    ));
                }
            }
        }
        state.output = None;

        if let Err(e) = self.destroy_working_directory().await {
            warn!("{:#}", e);
        }
        if let Some(hook) = state.hook.take() {
            hook.remove();
        }
        if result.is_ok() {
            info!("'{}' has been stopped", self.config.name);
        }
        result
    }

    fn register_hook(self: &Arc<Self>) -> anyhow::Result<ShutdownHook> {
        let inner = Arc::downgrade(self);
        ShutdownHook::register(self.config.name.clone(), move || async move {
            if let Some(inner) = inner.upgrade() {
                if let Err(e) = inner.stop().await {
                    warn!("{}", e);
                }
            }
        })
    }

    /// React to the process exiting without being asked to
    fn watch_exit(self: &Arc<Self>, process: &ProcessHandle) -> CancellationToken {
        let watch = CancellationToken::new();
        let cancelled = watch.clone();
        let exited = process.on_exit();
        let inner = Arc::downgrade(self);

        tokio::spawn(async move {
            let exit = tokio::select! {
                biased;
                _ = cancelled.cancelled() => return,
                exit = exited => exit,
            };
            let Some(inner) = inner.upgrade() else {
                return;
            };
            warn!(
                "'{}' exited unexpectedly with code {:?}",
                inner.config.name, exit.code
            );
            if let Err(e) = inner.stop_after_exit(&cancelled).await {
                warn!("{}", e);
            }
        });
        watch
    }
}

impl Drop for CassandraInner {
    fn drop(&mut self) {
        let process = self
            .process
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(process) = process.filter(ProcessHandle::is_alive) {
            warn!(
                "'{}' dropped while running (PID: {}) - attempting emergency cleanup",
                self.config.name,
                process.pid()
            );
            process.destroy_forcibly();
        }
    }
}

/// Kills a launched node when its start attempt is dropped before it settled
struct LaunchGuard {
    name: String,
    process: ProcessHandle,
    armed: bool,
}

impl LaunchGuard {
    fn new(name: &str, process: &ProcessHandle) -> Self {
        Self {
            name: name.to_string(),
            process: process.clone(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        if self.armed && self.process.is_alive() {
            warn!(
                "Start of '{}' was abandoned (PID: {}) - killing the node",
                self.name,
                self.process.pid()
            );
            self.process.destroy_forcibly();
        }
    }
}

/// Observers of one start attempt; dropping it detaches all of them
struct Readiness<'a> {
    process: &'a ProcessHandle,
    output: OutputCollector,
    errors: ErrorCollector,
    startup: StartupParser,
    transport: NativeTransportParser,
}

impl<'a> Readiness<'a> {
    fn attach(config: &DatabaseConfig, process: &'a ProcessHandle) -> Self {
        Self {
            process,
            output: OutputCollector::attach(process),
            errors: ErrorCollector::attach(process),
            startup: StartupParser::attach(process),
            transport: NativeTransportParser::attach(config, process),
        }
    }

    async fn wait(&self, instance: &str, timeout: Duration) -> anyhow::Result<TransportStatus> {
        let ready = wait_until(timeout, || {
            if let Some(address) = self.transport.malformed_address() {
                return Err(ReadinessError::MalformedAddress {
                    instance: instance.to_string(),
                    address: address.to_string(),
                }
                .into());
            }
            Ok(!self.process.is_alive()
                || self.transport.is_failed()
                || (self.transport.is_complete() && self.startup.is_complete()))
        })
        .await?;

        if self.transport.is_failed() {
            return Err(ReadinessError::TransportFailed {
                instance: instance.to_string(),
                diagnostics: self.diagnostics(),
            }
            .into());
        }
        if !self.process.is_alive() {
            // let the readers drain what the process printed before exiting
            tokio::time::sleep(POLL_INTERVAL).await;
            return Err(ReadinessError::NotAlive {
                instance: instance.to_string(),
                diagnostics: self.diagnostics(),
            }
            .into());
        }
        if !ready {
            return Err(ReadinessError::Timeout {
                instance: instance.to_string(),
                timeout,
            }
            .into());
        }
        Ok(self.transport.status())
    }

    fn diagnostics(&self) -> String {
        let mut message = String::new();
        let errors = self.errors.lines();
        if !errors.is_empty() {
            let _ = write!(message, "\n\tErrors:\n\t\t{}", errors.join("\n\t\t"));
        }
        let output = self.output.lines();
        if !output.is_empty() {
            let _ = write!(
                message,
                "\n\tOutput (last {} lines):\n\t\t{}",
                output.len(),
                output.join("\n\t\t")
            );
        }
        message
    }
}
