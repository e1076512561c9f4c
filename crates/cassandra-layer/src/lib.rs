//! Run a Cassandra node as a supervised child process.
//!
//! [`Cassandra`] drives one node through `start()` and `stop()`, selecting
//! the Unix or Windows driver for the current platform.

mod config;
mod factory;
mod runner;
mod shutdown;
mod working_directory;

pub use config::{CassandraConfig, CassandraConfigBuilder, DEFAULT_STARTUP_TIMEOUT};
pub use factory::{CASSANDRA_CONFIG_PROPERTY, PlatformDatabaseFactory};
pub use runner::{Cassandra, PlatformDatabase};
pub use shutdown::ShutdownHook;
pub use working_directory::{
    CASSANDRA_HOME, CopyFileCustomizer, CopyWorkingDirectoryInitializer, DEFAULT_DESTROY_TARGETS,
    DefaultWorkingDirectoryDestroyer,
};

// Re-export core functionality
pub use cassandra_layer_core::*;
