mod unix_database;

pub use unix_database::{UnixDatabase, launch_args};

use cassandra_layer_core::DatabaseConfig;

pub struct UnixDatabaseFactory;

impl UnixDatabaseFactory {
    pub fn create_database(config: DatabaseConfig) -> UnixDatabase {
        UnixDatabase::new(config)
    }

    pub fn platform_name() -> &'static str {
        "Unix"
    }
}
