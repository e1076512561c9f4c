use crate::working_directory::{CopyWorkingDirectoryInitializer, DefaultWorkingDirectoryDestroyer};
use cassandra_layer_core::{
    DatabaseFactory, LineConsumer, Version, WorkingDirectoryCustomizer, WorkingDirectoryDestroyer,
    WorkingDirectoryInitializer,
};
use derive_builder::Builder;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long `start()` waits for the node to report readiness by default
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(90);

/// Configuration of a [`Cassandra`](crate::Cassandra) supervisor
#[derive(Clone, Builder)]
#[builder(setter(into))]
pub struct CassandraConfig {
    #[builder(default = "\"cassandra\".to_string()")]
    pub name: String,
    #[builder(default)]
    pub version: Version,
    pub working_directory: PathBuf,
    #[builder(default = "DEFAULT_STARTUP_TIMEOUT")]
    pub startup_timeout: Duration,
    #[builder(default)]
    #[builder(setter(custom))]
    pub environment_variables: HashMap<String, String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub config_properties: BTreeMap<String, Value>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub system_properties: BTreeMap<String, String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub jvm_options: Vec<String>,
    /// Stop the node when the host process receives SIGINT, SIGTERM or SIGQUIT
    #[builder(default = "true")]
    pub register_shutdown_hook: bool,
    #[builder(default = "Arc::new(CopyWorkingDirectoryInitializer::default())")]
    #[builder(setter(custom))]
    pub working_directory_initializer: Arc<dyn WorkingDirectoryInitializer>,
    #[builder(default = "Arc::new(DefaultWorkingDirectoryDestroyer::default())")]
    #[builder(setter(custom))]
    pub working_directory_destroyer: Arc<dyn WorkingDirectoryDestroyer>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub working_directory_customizers: Vec<Arc<dyn WorkingDirectoryCustomizer>>,
    /// Replaces the platform database factory
    #[builder(default)]
    #[builder(setter(custom))]
    pub database_factory: Option<Arc<dyn DatabaseFactory>>,
    /// Receives every output line of the node instead of `tracing`
    #[builder(default)]
    #[builder(setter(custom))]
    pub output_consumer: Option<Arc<dyn LineConsumer>>,
}

impl CassandraConfig {
    pub fn builder() -> CassandraConfigBuilder {
        CassandraConfigBuilder::default()
    }
}

impl std::fmt::Debug for CassandraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CassandraConfig")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("working_directory", &self.working_directory)
            .field("startup_timeout", &self.startup_timeout)
            .field("environment_variables", &self.environment_variables)
            .field("config_properties", &self.config_properties)
            .field("system_properties", &self.system_properties)
            .field("jvm_options", &self.jvm_options)
            .field("register_shutdown_hook", &self.register_shutdown_hook)
            .field("customizers", &self.working_directory_customizers.len())
            .field("custom_database_factory", &self.database_factory.is_some())
            .finish()
    }
}

impl CassandraConfigBuilder {
    pub fn environment_variable<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.environment_variables.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn environment_variables<T: ToString, I: IntoIterator<Item = (T, T)>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        let map = self.environment_variables.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            map.insert(key.to_string(), value.to_string());
        }
        self
    }

    /// Set a `cassandra.yaml` property; dotted keys address nested options
    pub fn config_property<T: ToString>(&mut self, key: T, value: impl Into<Value>) -> &mut Self {
        let map = self.config_properties.get_or_insert_with(BTreeMap::new);
        map.insert(key.to_string(), value.into());
        self
    }

    pub fn config_properties<T: ToString, I: IntoIterator<Item = (T, Value)>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        let map = self.config_properties.get_or_insert_with(BTreeMap::new);
        for (key, value) in iter {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn system_property<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.system_properties.get_or_insert_with(BTreeMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn system_properties<T: ToString, I: IntoIterator<Item = (T, T)>>(
        &mut self,
        iter: I,
    ) -> &mut Self {
        let map = self.system_properties.get_or_insert_with(BTreeMap::new);
        for (key, value) in iter {
            map.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn jvm_options<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let options = self.jvm_options.get_or_insert_with(Vec::new);
        options.extend(iter.into_iter().map(|s| s.to_string()));
        self
    }

    pub fn working_directory_initializer(
        &mut self,
        initializer: impl WorkingDirectoryInitializer + 'static,
    ) -> &mut Self {
        self.working_directory_initializer = Some(Arc::new(initializer));
        self
    }

    pub fn working_directory_destroyer(
        &mut self,
        destroyer: impl WorkingDirectoryDestroyer + 'static,
    ) -> &mut Self {
        self.working_directory_destroyer = Some(Arc::new(destroyer));
        self
    }

    /// Append a customizer; customizers run in the order they were added
    pub fn working_directory_customizer(
        &mut self,
        customizer: impl WorkingDirectoryCustomizer + 'static,
    ) -> &mut Self {
        let customizers = self.working_directory_customizers.get_or_insert_with(Vec::new);
        customizers.push(Arc::new(customizer));
        self
    }

    pub fn database_factory(&mut self, factory: impl DatabaseFactory + 'static) -> &mut Self {
        self.database_factory = Some(Some(Arc::new(factory)));
        self
    }

    pub fn output_consumer(&mut self, consumer: impl LineConsumer + 'static) -> &mut Self {
        self.output_consumer = Some(Some(Arc::new(consumer)));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CassandraConfig::builder()
            .working_directory("/tmp/cassandra")
            .build()
            .unwrap();

        assert_eq!(config.name, "cassandra");
        assert_eq!(config.version, Version::default());
        assert_eq!(config.startup_timeout, DEFAULT_STARTUP_TIMEOUT);
        assert!(config.register_shutdown_hook);
        assert!(config.working_directory_customizers.is_empty());
        assert!(config.database_factory.is_none());
        assert!(config.output_consumer.is_none());
    }

    #[test]
    fn test_working_directory_is_required() {
        assert!(CassandraConfig::builder().name("node").build().is_err());
    }

    #[test]
    fn test_builder_collects_properties() {
        let config = CassandraConfig::builder()
            .name("node-1")
            .version(Version::parse("3.11.17").unwrap())
            .working_directory("/tmp/node-1")
            .startup_timeout(Duration::from_secs(30))
            .environment_variable("MAX_HEAP_SIZE", "256M")
            .config_property("native_transport_port", 19042)
            .config_property("client_encryption_options.enabled", false)
            .system_property("cassandra.ring_delay_ms", "0")
            .jvm_options(["-Xss256k"])
            .jvm_options(["-XX:+UseG1GC"])
            .register_shutdown_hook(false)
            .output_consumer(|_: &str| {})
            .build()
            .unwrap();

        assert_eq!(config.version.major(), 3);
        assert_eq!(config.startup_timeout, Duration::from_secs(30));
        assert_eq!(config.environment_variables["MAX_HEAP_SIZE"], "256M");
        assert_eq!(config.config_properties["native_transport_port"], 19042);
        assert_eq!(config.jvm_options, vec!["-Xss256k", "-XX:+UseG1GC"]);
        assert!(!config.register_shutdown_hook);
        assert!(config.output_consumer.is_some());
    }
}
