mod windows_database;

pub use windows_database::{PID_FILE, WindowsDatabase, launch_args, script_commands};

use cassandra_layer_core::DatabaseConfig;

pub struct WindowsDatabaseFactory;

impl WindowsDatabaseFactory {
    pub fn create_database(config: DatabaseConfig) -> WindowsDatabase {
        WindowsDatabase::new(config)
    }

    pub fn platform_name() -> &'static str {
        "Windows"
    }
}
