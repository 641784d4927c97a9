//! Configuration system for psmd.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PSMD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/psmd/config.toml
//!   3. ~/.config/psmd/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::DEFAULT_SERVER_PORT;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PsmdConfig {
    /// Seeds of the topics a client node joins at startup.
    pub topics: Vec<String>,
    pub identity: IdentityConfig,
    pub rendezvous: RendezvousSettings,
    pub transport: TransportConfig,
    pub server: ServerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Hex peer id. Empty = random per run.
    pub peer_id: String,
    /// Port announced to other peers. 0 = the transport's source port.
    pub advertise_port: u16,
}

/// Timing knobs for a rendezvous session. All durations are seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousSettings {
    pub announce_interval: u64,
    pub lookup_interval: u64,
    /// Records not re-sighted for this long are swept.
    pub peer_ttl: u64,
    /// Upper bound on waiting for the transport to report ready.
    pub bootstrap_timeout: u64,
    /// Upper bound on any single transport call.
    pub call_timeout: u64,
    /// How long `leave` waits for in-flight calls before forcing close.
    pub shutdown_timeout: u64,
    /// How often the directory sweep runs.
    pub sweep_interval: u64,
    /// Consecutive failures of one operation before a degraded event.
    pub degraded_threshold: u32,
    /// Stop looking up a topic once this many peers are known. 0 = never.
    pub max_peers_per_topic: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// psmd rendezvous server over UDP.
    #[default]
    Udp,
    /// Multicast beacons on the local link.
    Lan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Rendezvous server address for the udp transport.
    pub server: String,
    /// Local interface address for the lan transport. Empty = any.
    pub lan_interface: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the rendezvous server binds.
    pub bind: String,
    /// Announcements expire after this many seconds without refresh.
    pub peer_ttl: u64,
    /// Seconds between announcement sweeps.
    pub sweep_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Status API port on 127.0.0.1. 0 = disabled.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RendezvousSettings {
    fn default() -> Self {
        Self {
            announce_interval: 60,
            lookup_interval: 60,
            peer_ttl: 600,
            bootstrap_timeout: 30,
            call_timeout: 30,
            shutdown_timeout: 5,
            sweep_interval: 1,
            degraded_threshold: 3,
            max_peers_per_topic: 0,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Udp,
            server: format!("127.0.0.1:{DEFAULT_SERVER_PORT}"),
            lan_interface: String::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_SERVER_PORT}"),
            peer_ttl: 600,
            sweep_interval: 1,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 7421 }
    }
}

impl RendezvousSettings {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval)
    }

    pub fn lookup_interval(&self) -> Duration {
        Duration::from_secs(self.lookup_interval)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    /// Reject settings that would hot-loop or never fire.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("announce_interval", self.announce_interval),
            ("lookup_interval", self.lookup_interval),
            ("peer_ttl", self.peer_ttl),
            ("bootstrap_timeout", self.bootstrap_timeout),
            ("call_timeout", self.call_timeout),
            ("sweep_interval", self.sweep_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be at least 1 second")));
            }
        }
        if self.degraded_threshold == 0 {
            return Err(ConfigError::Invalid(
                "degraded_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    /// A zero TTL would sweep every announcement before anyone looks it up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.is_empty() {
            return Err(ConfigError::Invalid("server.bind must not be empty".into()));
        }
        if self.peer_ttl == 0 {
            return Err(ConfigError::Invalid(
                "server.peer_ttl must be at least 1 second".into(),
            ));
        }
        if self.sweep_interval == 0 {
            return Err(ConfigError::Invalid(
                "server.sweep_interval must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}

impl ApiConfig {
    /// Port 0 turns the status API off.
    pub fn enabled(&self) -> bool {
        self.port != 0
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("psmd")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl PsmdConfig {
    /// Load config: env vars → file → defaults. The result is validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            PsmdConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check every section that has constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rendezvous.validate()?;
        self.server.validate()
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PSMD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&PsmdConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PSMD_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("PSMD_IDENTITY__PEER_ID") {
            self.identity.peer_id = v;
        }
        if let Some(p) = get("PSMD_IDENTITY__ADVERTISE_PORT").and_then(|v| v.parse().ok()) {
            self.identity.advertise_port = p;
        }
        let secs = [
            ("PSMD_RENDEZVOUS__ANNOUNCE_INTERVAL", &mut self.rendezvous.announce_interval),
            ("PSMD_RENDEZVOUS__LOOKUP_INTERVAL", &mut self.rendezvous.lookup_interval),
            ("PSMD_RENDEZVOUS__PEER_TTL", &mut self.rendezvous.peer_ttl),
            ("PSMD_RENDEZVOUS__BOOTSTRAP_TIMEOUT", &mut self.rendezvous.bootstrap_timeout),
            ("PSMD_RENDEZVOUS__CALL_TIMEOUT", &mut self.rendezvous.call_timeout),
            ("PSMD_RENDEZVOUS__SHUTDOWN_TIMEOUT", &mut self.rendezvous.shutdown_timeout),
            ("PSMD_RENDEZVOUS__SWEEP_INTERVAL", &mut self.rendezvous.sweep_interval),
            ("PSMD_SERVER__PEER_TTL", &mut self.server.peer_ttl),
            ("PSMD_SERVER__SWEEP_INTERVAL", &mut self.server.sweep_interval),
        ];
        for (key, slot) in secs {
            if let Some(v) = get(key).and_then(|v| v.parse().ok()) {
                *slot = v;
            }
        }
        if let Some(n) = get("PSMD_RENDEZVOUS__DEGRADED_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.rendezvous.degraded_threshold = n;
        }
        if let Some(n) = get("PSMD_RENDEZVOUS__MAX_PEERS_PER_TOPIC").and_then(|v| v.parse().ok()) {
            self.rendezvous.max_peers_per_topic = n;
        }
        if let Some(v) = get("PSMD_TRANSPORT__KIND") {
            match v.as_str() {
                "udp" => self.transport.kind = TransportKind::Udp,
                "lan" => self.transport.kind = TransportKind::Lan,
                _ => {}
            }
        }
        if let Some(v) = get("PSMD_TRANSPORT__SERVER") {
            self.transport.server = v;
        }
        if let Some(v) = get("PSMD_TRANSPORT__LAN_INTERFACE") {
            self.transport.lan_interface = v;
        }
        if let Some(v) = get("PSMD_SERVER__BIND") {
            self.server.bind = v;
        }
        if let Some(p) = get("PSMD_API__PORT").and_then(|v| v.parse().ok()) {
            self.api.port = p;
        }
        if let Some(v) = get("PSMD_TOPICS") {
            self.topics = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }
}
