use crate::config::CassandraConfig;
use crate::runner::PlatformDatabase;
use anyhow::Result;
use cassandra_layer_core::{Database, DatabaseConfig, DatabaseFactory, Version};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// System property pointing the server at its configuration file
pub const CASSANDRA_CONFIG_PROPERTY: &str = "cassandra.config";

/// Builds [`PlatformDatabase`]s from the supervisor configuration.
///
/// System properties and JVM options end up in `JVM_EXTRA_OPTS`; when the
/// working directory holds `conf/cassandra.yaml` and `cassandra.config` was
/// not given explicitly, it is pointed at that file.
#[derive(Debug, Clone)]
pub struct PlatformDatabaseFactory {
    name: String,
    version: Version,
    environment_variables: HashMap<String, String>,
    config_properties: BTreeMap<String, Value>,
    system_properties: BTreeMap<String, String>,
    jvm_options: Vec<String>,
}

impl PlatformDatabaseFactory {
    pub fn new(config: &CassandraConfig) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            environment_variables: config.environment_variables.clone(),
            config_properties: config.config_properties.clone(),
            system_properties: config.system_properties.clone(),
            jvm_options: config.jvm_options.clone(),
        }
    }

    pub fn platform_name() -> &'static str {
        PlatformDatabase::platform_name()
    }

    /// The driver configuration for `working_directory`
    pub fn database_config(&self, working_directory: &Path) -> Result<DatabaseConfig> {
        let mut system_properties = self.system_properties.clone();
        let config_file = working_directory.join("conf").join("cassandra.yaml");
        if !system_properties.contains_key(CASSANDRA_CONFIG_PROPERTY) && config_file.is_file() {
            system_properties.insert(CASSANDRA_CONFIG_PROPERTY.to_string(), file_url(&config_file));
        }

        let config = DatabaseConfig::builder()
            .name(self.name.clone())
            .version(self.version.clone())
            .working_directory(working_directory)
            .environment_variables(self.environment_variables.clone())
            .config_properties(self.config_properties.clone())
            .system_properties(system_properties)
            .jvm_options(self.jvm_options.clone())
            .build()?;
        Ok(config)
    }
}

impl DatabaseFactory for PlatformDatabaseFactory {
    fn create(&self, working_directory: &Path) -> Result<Box<dyn Database>> {
        let config = self.database_config(working_directory)?;
        Ok(Box::new(PlatformDatabase::new(config)))
    }
}

fn file_url(path: &Path) -> String {
    let path = path.display().to_string().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{path}")
    } else {
        format!("file:///{path}")
    }
}
