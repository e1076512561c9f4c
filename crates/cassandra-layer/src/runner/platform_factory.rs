use anyhow::Result;
use async_trait::async_trait;
use cassandra_layer_core::{Database, DatabaseConfig, ProcessHandle};
use cassandra_layer_unix::{UnixDatabase, UnixDatabaseFactory};
use cassandra_layer_windows::{WindowsDatabase, WindowsDatabaseFactory};
use tracing::debug;

/// Platform-specific database drivers
pub enum PlatformDatabase {
    Unix(UnixDatabase),
    Windows(WindowsDatabase),
}

impl PlatformDatabase {
    /// Pick the driver for the platform this binary was built for
    pub fn new(config: DatabaseConfig) -> Self {
        if cfg!(windows) {
            debug!("Creating Windows database for '{}'", config.name);
            Self::Windows(WindowsDatabaseFactory::create_database(config))
        } else {
            debug!("Creating Unix database for '{}'", config.name);
            Self::Unix(UnixDatabaseFactory::create_database(config))
        }
    }

    pub fn platform_name() -> &'static str {
        if cfg!(windows) {
            WindowsDatabaseFactory::platform_name()
        } else {
            UnixDatabaseFactory::platform_name()
        }
    }
}

#[async_trait]
impl Database for PlatformDatabase {
    fn config(&self) -> &DatabaseConfig {
        match self {
            Self::Unix(database) => database.config(),
            Self::Windows(database) => database.config(),
        }
    }

    fn process(&self) -> Option<&ProcessHandle> {
        match self {
            Self::Unix(database) => database.process(),
            Self::Windows(database) => database.process(),
        }
    }

    async fn start(&mut self) -> Result<ProcessHandle> {
        match self {
            Self::Unix(database) => database.start().await,
            Self::Windows(database) => database.start().await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Unix(database) => database.stop().await,
            Self::Windows(database) => database.stop().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let config = DatabaseConfig::builder()
            .name("cassandra")
            .working_directory(std::env::temp_dir())
            .build()
            .unwrap();
        let database = PlatformDatabase::new(config);

        #[cfg(windows)]
        assert!(matches!(database, PlatformDatabase::Windows(_)));
        #[cfg(not(windows))]
        assert!(matches!(database, PlatformDatabase::Unix(_)));
        assert!(database.process().is_none());
    }
}
