use crate::version::Version;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Environment variable the Cassandra launch scripts append to the JVM command line
pub const JVM_EXTRA_OPTS: &str = "JVM_EXTRA_OPTS";

/// Immutable configuration of one database driver instance
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub name: String,
    #[builder(default)]
    pub version: Version,
    pub working_directory: PathBuf,
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
}

impl DatabaseConfig {
    pub fn builder() -> DatabaseConfigBuilder {
        DatabaseConfigBuilder::default()
    }

    /// Look up a config property by dotted path.
    ///
    /// Both nested objects (`{"client_encryption_options": {"enabled": true}}`)
    /// and flat dotted keys (`"client_encryption_options.enabled": true`) are
    /// understood.
    pub fn config_property(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.config_properties.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.config_properties.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Configured native transport port
    pub fn port(&self) -> Option<u16> {
        self.config_property("native_transport_port").and_then(as_port)
    }

    /// Configured SSL native transport port, if any
    pub fn ssl_port(&self) -> Option<u16> {
        self.config_property("native_transport_port_ssl")
            .and_then(as_port)
    }

    /// Explicit `start_native_transport` setting, if present
    pub fn native_transport_enabled(&self) -> Option<bool> {
        match self.config_property("start_native_transport")? {
            Value::Bool(enabled) => Some(*enabled),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Environment of the server process: the configured variables plus
    /// `JVM_EXTRA_OPTS` carrying every system property and JVM option
    pub fn launch_environment(&self) -> HashMap<String, String> {
        let mut env = self.environment_variables.clone();
        let mut options: Vec<String> = Vec::new();
        if let Some(existing) = env.get(JVM_EXTRA_OPTS).filter(|v| !v.trim().is_empty()) {
            options.push(existing.trim().to_string());
        }
        options.extend(
            self.system_properties
                .iter()
                .map(|(key, value)| format!("-D{key}={value}")),
        );
        options.extend(self.jvm_options.iter().cloned());
        if !options.is_empty() {
            env.insert(JVM_EXTRA_OPTS.to_string(), options.join(" "));
        }
        env
    }
}

fn as_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

impl DatabaseConfigBuilder {
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
}
