use crate::config::DatabaseConfig;
use crate::parser::TransportStatus;
use crate::version::Version;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Snapshot of a successfully started node.
///
/// A new value is published on every successful start; earlier snapshots
/// stay valid for whoever still holds them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    name: String,
    version: Version,
    working_directory: PathBuf,
    address: Option<IpAddr>,
    port: Option<u16>,
    ssl_port: Option<u16>,
    native_transport_enabled: bool,
    config_properties: BTreeMap<String, Value>,
    system_properties: BTreeMap<String, String>,
    environment_variables: HashMap<String, String>,
    jvm_options: Vec<String>,
}

impl Settings {
    pub fn new(config: &DatabaseConfig, transport: TransportStatus) -> Self {
        Self {
            name: config.name.clone(),
            version: config.version.clone(),
            working_directory: config.working_directory.clone(),
            address: transport.address,
            port: transport.port,
            ssl_port: transport.ssl_port,
            native_transport_enabled: !transport.disabled,
            config_properties: config.config_properties.clone(),
            system_properties: config.system_properties.clone(),
            environment_variables: config.environment_variables.clone(),
            jvm_options: config.jvm_options.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Address the native transport is bound to
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Native transport port; the SSL port when no plain port was bound
    pub fn port(&self) -> Option<u16> {
        self.port.or(self.ssl_port)
    }

    pub fn ssl_port(&self) -> Option<u16> {
        self.ssl_port
    }

    pub fn is_native_transport_enabled(&self) -> bool {
        self.native_transport_enabled
    }

    pub fn config_properties(&self) -> &BTreeMap<String, Value> {
        &self.config_properties
    }

    pub fn system_properties(&self) -> &BTreeMap<String, String> {
        &self.system_properties
    }

    pub fn environment_variables(&self) -> &HashMap<String, String> {
        &self.environment_variables
    }

    pub fn jvm_options(&self) -> &[String] {
        &self.jvm_options
    }
}
