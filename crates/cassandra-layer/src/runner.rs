mod inner;
mod platform_factory;

pub use platform_factory::PlatformDatabase;

use crate::config::CassandraConfig;
use cassandra_layer_core::{CassandraError, Settings, Version};
use inner::CassandraInner;
use std::path::Path;
use std::sync::Arc;

/// Supervises a single Cassandra node.
///
/// `start()` provisions the working directory, launches the node through the
/// platform driver and waits until its native transport is up and startup
/// has completed. `stop()` walks the driver's stop ladder and tears the
/// working directory down again. Both are idempotent and serialized against
/// each other.
///
/// If the node exits on its own after a successful start, the supervisor
/// stops itself so its state keeps matching reality. Dropping the supervisor
/// while the node is alive kills the node.
pub struct Cassandra {
    inner: Arc<CassandraInner>,
}

impl Cassandra {
    pub fn new(config: CassandraConfig) -> Self {
        Self {
            inner: Arc::new(CassandraInner::new(config)),
        }
    }

    /// Start the node; a no-op if it is already running
    pub async fn start(&self) -> Result<(), CassandraError> {
        self.inner.start().await
    }

    /// Stop the node; a no-op if it is not running
    pub async fn stop(&self) -> Result<(), CassandraError> {
        self.inner.stop().await
    }

    /// Whether the node was started and its process is still alive
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Settings of the most recent successful start.
    ///
    /// They remain available after `stop()`; only a node that was never
    /// started successfully reports [`CassandraError::NotStarted`].
    pub fn get_settings(&self) -> Result<Arc<Settings>, CassandraError> {
        self.inner.settings()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn version(&self) -> &Version {
        &self.inner.config.version
    }

    pub fn working_directory(&self) -> &Path {
        &self.inner.config.working_directory
    }

    pub fn config(&self) -> &CassandraConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Cassandra {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cassandra")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("working_directory", &self.working_directory())
            .field("running", &self.is_running())
            .finish()
    }
}
