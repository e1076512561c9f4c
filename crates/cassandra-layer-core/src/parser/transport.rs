use super::{Streams, attach};
use crate::config::DatabaseConfig;
use crate::output::{LineConsumer, Subscription};
use crate::process::ProcessHandle;
use regex::Regex;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};

static TRANSPORT_STARTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)listening\s+for\s+(?:cql|native)\s+clients\s+on\s+(?P<address>\S+):(?P<port>\d+)")
        .expect("valid transport pattern")
});

static TRANSPORT_ENCRYPTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\(encrypted\)").expect("valid encrypted pattern"));

static TRANSPORT_DISABLED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)not\s+starting\s+(?:native|client)\s+transport").expect("valid disabled pattern")
});

static TRANSPORT_BIND_FAILED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)failed\s+to\s+bind\s+port\s+\d+\s+on\s+\S+").expect("valid bind pattern")
});

/// Observed state of the native transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStatus {
    pub disabled: bool,
    pub address: Option<IpAddr>,
    pub port: Option<u16>,
    pub ssl_port: Option<u16>,
}

// ports are stored as u32 with zero meaning "not observed"
#[derive(Default)]
struct State {
    ssl_configured: bool,
    disabled: AtomicBool,
    failed: AtomicBool,
    address: OnceLock<IpAddr>,
    port: AtomicU32,
    ssl_port: AtomicU32,
    malformed_address: OnceLock<String>,
}

impl State {
    fn load_port(port: &AtomicU32) -> Option<u16> {
        match port.load(Ordering::Acquire) {
            0 => None,
            port => u16::try_from(port).ok(),
        }
    }
}

impl LineConsumer for State {
    fn accept(&self, line: &str) {
        if let Some(captures) = TRANSPORT_STARTED.captures(line) {
            let raw = &captures["address"];
            let Some(address) = parse_address(raw) else {
                let _ = self.malformed_address.set(raw.to_string());
                return;
            };
            let _ = self.address.set(address);
            if let Ok(port) = captures["port"].parse::<u16>() {
                if self.ssl_configured && TRANSPORT_ENCRYPTED.is_match(line) {
                    self.ssl_port.store(u32::from(port), Ordering::Release);
                } else {
                    self.port.store(u32::from(port), Ordering::Release);
                }
            }
        } else if TRANSPORT_DISABLED.is_match(line) {
            self.disabled.store(true, Ordering::Release);
        } else if self.address.get().is_some() && TRANSPORT_BIND_FAILED.is_match(line) {
            self.failed.store(true, Ordering::Release);
        }
    }
}

/// Parse the `host/ip` form the server prints for bound addresses.
fn parse_address(raw: &str) -> Option<IpAddr> {
    let ip = raw.rsplit('/').next().unwrap_or(raw);
    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    let ip = ip.split('%').next().unwrap_or(ip);
    ip.parse().ok()
}

/// Tracks whether the native transport came up, was disabled or failed.
///
/// Reader tasks write the state, the supervisor polls it; every field is
/// atomic so no locking is involved. `is_failed` never resets once set.
pub struct NativeTransportParser {
    state: Arc<State>,
    _subscriptions: Vec<Subscription>,
}

impl NativeTransportParser {
    /// Create an unattached parser; feed it with [`NativeTransportParser::accept`]
    pub fn new(config: &DatabaseConfig) -> Self {
        let disabled_by_version =
            config.version.major() < 2 && config.native_transport_enabled() != Some(true);
        Self {
            state: Arc::new(State {
                ssl_configured: config.ssl_port().is_some(),
                disabled: AtomicBool::new(disabled_by_version),
                ..State::default()
            }),
            _subscriptions: Vec::new(),
        }
    }

    /// Create a parser listening to both outputs of `process`
    pub fn attach(config: &DatabaseConfig, process: &ProcessHandle) -> Self {
        let mut parser = Self::new(config);
        parser._subscriptions = attach(process, parser.state.clone(), Streams::Both);
        parser
    }

    pub fn accept(&self, line: &str) {
        self.state.accept(line);
    }

    pub fn is_complete(&self) -> bool {
        self.is_disabled() || self.is_started()
    }

    pub fn is_started(&self) -> bool {
        self.address().is_some() && (!self.state.ssl_configured || self.ssl_port().is_some())
    }

    pub fn is_disabled(&self) -> bool {
        self.state.disabled.load(Ordering::Acquire)
    }

    pub fn is_failed(&self) -> bool {
        self.state.failed.load(Ordering::Acquire)
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.state.address.get().copied()
    }

    /// Plain port, falling back to the SSL port when only that was observed
    pub fn port(&self) -> Option<u16> {
        self.plain_port().or_else(|| self.ssl_port())
    }

    pub fn plain_port(&self) -> Option<u16> {
        State::load_port(&self.state.port)
    }

    pub fn ssl_port(&self) -> Option<u16> {
        State::load_port(&self.state.ssl_port)
    }

    /// Raw address text of a listening line that could not be parsed
    pub fn malformed_address(&self) -> Option<&str> {
        self.state.malformed_address.get().map(String::as_str)
    }

    pub fn status(&self) -> TransportStatus {
        TransportStatus {
            disabled: self.is_disabled(),
            address: self.address(),
            port: self.plain_port(),
            ssl_port: self.ssl_port(),
        }
    }

    /// Detach from all outputs
    pub fn close(self) {}
}
