use crate::config::DatabaseConfig;
use crate::process::ProcessHandle;
use crate::version::Version;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// One platform-specific attempt at running a Cassandra node.
///
/// A database goes `new → started → stopped`. Its process handle is present
/// only between a successful `start()` and a completed `stop()`.
///
/// # Implementation Notes
///
/// Implementations should:
/// - Resolve and validate the launch executable under the working directory
/// - Log the full command line at info level before launching
/// - Stop through an escalation ladder, from a graceful request to `destroy()`
#[async_trait]
pub trait Database: Send + Sync {
    fn config(&self) -> &DatabaseConfig;

    /// The running process, if started and not yet stopped
    fn process(&self) -> Option<&ProcessHandle>;

    /// Launch the server process
    async fn start(&mut self) -> Result<ProcessHandle>;

    /// Terminate the server process; a no-op when not started
    async fn stop(&mut self) -> Result<()>;
}

/// Creates a fresh [`Database`] for a prepared working directory.
///
/// Factories own config synthesis: they turn the caller's properties into
/// the environment, system properties and JVM options of the driver.
pub trait DatabaseFactory: Send + Sync {
    fn create(&self, working_directory: &Path) -> Result<Box<dyn Database>>;
}

/// Leaves a runnable server tree in the working directory
#[async_trait]
pub trait WorkingDirectoryInitializer: Send + Sync {
    async fn init(&self, working_directory: &Path, version: &Version) -> Result<()>;
}

/// Removes what the initializer created; failures are logged by the caller
#[async_trait]
pub trait WorkingDirectoryDestroyer: Send + Sync {
    async fn destroy(&self, working_directory: &Path, version: &Version) -> Result<()>;
}

/// Adjusts an initialized working directory, in caller-supplied order
#[async_trait]
pub trait WorkingDirectoryCustomizer: Send + Sync {
    async fn customize(&self, working_directory: &Path, version: &Version) -> Result<()>;
}
