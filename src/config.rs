//! AWG Admin Configuration
//!
//! This module provides configuration structures for the AWG Admin
//! peer manager.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::interface::ObfuscationParameters;

/// Main AWG Admin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwgAdminConfig {
    /// Network interface configuration
    pub interface: InterfaceConfig,

    /// Static obfuscation parameters (optional)
    #[serde(default)]
    pub obfuscation: Option<ObfuscationParameters>,

    /// Peer database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Peer maintenance configuration
    #[serde(default)]
    pub peers: PeersConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which interface controller drives the peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    /// Shell out to the awg/wg tools
    #[default]
    Process,
    /// In-memory simulation for development
    Simulated,
}

/// Where key material comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeygenMode {
    /// `wg genkey` / `wg pubkey` / `wg genpsk`
    #[default]
    Process,
    /// Local CSPRNG
    Local,
}

impl std::fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerKind::Process => write!(f, "process"),
            ControllerKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Network interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Interface name
    #[serde(default = "default_interface_name")]
    pub name: String,

    /// Controller implementation
    #[serde(default)]
    pub controller: ControllerKind,

    /// Key generation mode
    #[serde(default)]
    pub keygen: KeygenMode,

    /// AmneziaWG control tool
    #[serde(default = "default_awg_binary")]
    pub awg_binary: String,

    /// WireGuard key tool
    #[serde(default = "default_wg_binary")]
    pub wg_binary: String,

    /// Public host name or IP clients connect to
    pub endpoint: String,

    /// UDP listen port (fallback when the interface does not report one)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Server tunnel address in CIDR form
    #[serde(default = "default_address")]
    pub address: String,

    /// DNS servers handed to clients
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,

    /// Server public key used when the interface does not report one
    #[serde(default)]
    pub public_key: String,

    /// Subprocess timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Artificial latency for the simulated controller in milliseconds
    #[serde(default)]
    pub simulated_latency_ms: u64,
}

/// Peer database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// Peer maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersConfig {
    /// Seconds between expiry sweeps (0 = disabled)
    #[serde(default = "default_expiry_check_interval")]
    pub expiry_check_interval_secs: u64,

    /// Push the durable roster onto the interface at startup
    #[serde(default = "default_true")]
    pub reconcile_on_start: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_interface_name() -> String {
    "awg0".to_string()
}

fn default_awg_binary() -> String {
    "awg".to_string()
}

fn default_wg_binary() -> String {
    "wg".to_string()
}

fn default_listen_port() -> u16 {
    51820
}

fn default_address() -> String {
    "10.8.0.1/24".to_string()
}

fn default_dns() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn default_command_timeout() -> u64 {
    10
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/awg-admin/awg-admin.db")
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_expiry_check_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for PeersConfig {
    fn default() -> Self {
        Self {
            expiry_check_interval_secs: default_expiry_check_interval(),
            reconcile_on_start: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl InterfaceConfig {
    /// Interface configuration for a given endpoint with every other field defaulted
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            name: default_interface_name(),
            controller: ControllerKind::default(),
            keygen: KeygenMode::default(),
            awg_binary: default_awg_binary(),
            wg_binary: default_wg_binary(),
            endpoint: endpoint.into(),
            listen_port: default_listen_port(),
            address: default_address(),
            dns: default_dns(),
            public_key: String::new(),
            command_timeout_secs: default_command_timeout(),
            simulated_latency_ms: 0,
        }
    }

    /// Get the subprocess timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Get the simulated latency as Duration
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

impl AwgAdminConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AwgAdminConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: AwgAdminConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let iface = &self.interface;

        if iface.name.is_empty() {
            return Err(crate::Error::Config("interface.name cannot be empty".into()));
        }

        if iface.name.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(crate::Error::Config(
                "interface.name cannot contain spaces or '/'".into(),
            ));
        }

        if iface.endpoint.trim().is_empty() {
            return Err(crate::Error::Config("interface.endpoint cannot be empty".into()));
        }

        if iface.listen_port == 0 {
            return Err(crate::Error::Config("interface.listen_port cannot be 0".into()));
        }

        if iface.command_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "interface.command_timeout_secs must be at least 1".into(),
            ));
        }

        subnet_prefix(&iface.address)
            .map_err(|_| crate::Error::Config(format!(
                "interface.address must be an IPv4 CIDR, got '{}'",
                iface.address
            )))?;

        if let Some(obfuscation) = &self.obfuscation {
            obfuscation
                .validate()
                .map_err(|e| crate::Error::Config(format!("obfuscation: {}", e)))?;
        }

        Ok(())
    }

    /// Allocation prefix (first three octets) of the server subnet
    pub fn subnet_prefix(&self) -> crate::Result<String> {
        subnet_prefix(&self.interface.address)
    }

    /// Get the expiry sweep interval, if enabled
    pub fn expiry_check_interval(&self) -> Option<Duration> {
        match self.peers.expiry_check_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Obfuscation parameters controllers fall back to
    pub fn fallback_obfuscation(&self) -> ObfuscationParameters {
        self.obfuscation.clone().unwrap_or_default()
    }
}

/// Derive the dotted three-octet allocation prefix from an IPv4 CIDR
/// such as `10.8.0.1/24`.
pub fn subnet_prefix(cidr: &str) -> crate::Result<String> {
    let (addr, len) = cidr
        .split_once('/')
        .ok_or_else(|| crate::Error::Validation(format!("'{}' is not in CIDR form", cidr)))?;

    let ip: Ipv4Addr = addr
        .trim()
        .parse()
        .map_err(|_| crate::Error::Validation(format!("'{}' is not an IPv4 address", addr)))?;

    let len: u8 = len
        .trim()
        .parse()
        .map_err(|_| crate::Error::Validation(format!("'{}' is not a prefix length", len)))?;
    if len > 32 {
        return Err(crate::Error::Validation(format!("prefix length {} exceeds 32", len)));
    }

    let [a, b, c, _] = ip.octets();
    Ok(format!("{}.{}.{}", a, b, c))
}
