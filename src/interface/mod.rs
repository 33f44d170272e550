//! Interface Controller Module
//!
//! Capability abstraction over the live AmneziaWG interface, with a
//! process-driven implementation and an in-memory simulation.

mod command;
pub(crate) mod output;
mod process;
mod simulated;

#[cfg(test)]
pub(crate) mod testing;

use std::net::IpAddr;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::config::{AwgAdminConfig, ControllerKind};
use crate::error::{Error, Result};

pub(crate) use command::CommandRunner;
pub use process::ProcessInterfaceController;
pub use simulated::SimulatedInterfaceController;

pub use crate::keys::KeyPair;

/// Server-side identity of the interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Interface name
    pub interface_name: String,
    /// Server public key (base64)
    pub public_key: String,
    /// UDP listen port
    pub listen_port: u16,
    /// Host clients connect to
    pub endpoint: String,
    /// Server tunnel address in CIDR form
    pub subnet: String,
    /// DNS servers handed to clients
    pub dns: Vec<String>,
}

/// AmneziaWG obfuscation parameters, identical on server and every client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfuscationParameters {
    /// Junk packet count
    pub jc: u32,
    /// Minimum junk packet size
    pub jmin: u32,
    /// Maximum junk packet size
    pub jmax: u32,
    /// Init packet junk size
    pub s1: u32,
    /// Response packet junk size
    pub s2: u32,
    /// Header obfuscation keys
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
    pub h4: u32,
}

impl Default for ObfuscationParameters {
    fn default() -> Self {
        Self {
            jc: 4,
            jmin: 40,
            jmax: 70,
            s1: 55,
            s2: 55,
            h1: 1234567891,
            h2: 1234567892,
            h3: 1234567893,
            h4: 1234567894,
        }
    }
}

impl ObfuscationParameters {
    /// Check the bounds every AmneziaWG client accepts
    pub fn validate(&self) -> Result<()> {
        if !(1..=128).contains(&self.jc) {
            return Err(Error::Validation("Jc must be between 1 and 128".into()));
        }
        if self.jmin > 1280 {
            return Err(Error::Validation("Jmin must be between 0 and 1280".into()));
        }
        if self.jmax > 1280 {
            return Err(Error::Validation("Jmax must be between 0 and 1280".into()));
        }
        if self.jmax < self.jmin {
            return Err(Error::Validation("Jmax must be >= Jmin".into()));
        }
        if self.s1 > 255 {
            return Err(Error::Validation("S1 must be between 0 and 255".into()));
        }
        if self.s2 > 255 {
            return Err(Error::Validation("S2 must be between 0 and 255".into()));
        }
        Ok(())
    }
}

/// Raw per-peer record as reported by the interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDump {
    /// Peer public key
    pub public_key: String,
    /// Current endpoint, if the peer has one
    pub endpoint: Option<String>,
    /// Allowed addresses as reported
    pub allowed_ips: String,
    /// Last handshake (unix seconds); `None` means never
    pub latest_handshake: Option<i64>,
    /// Bytes received from the peer
    pub transfer_rx: u64,
    /// Bytes sent to the peer
    pub transfer_tx: u64,
}

/// Operations on the live network interface.
///
/// Every operation may suspend on subprocess I/O or simulated delay and
/// fails with [`Error::InterfaceCommand`].
#[async_trait::async_trait]
pub trait InterfaceController: Send + Sync {
    /// Short name of the implementation, for logs
    fn kind(&self) -> &'static str;

    /// Read the server identity
    async fn server_identity(&self) -> Result<ServerIdentity>;

    /// Read the obfuscation parameters the interface runs with
    async fn obfuscation_parameters(&self) -> Result<ObfuscationParameters>;

    /// Add a peer, or update allowed address and preshared key of an existing one
    async fn add_peer(&self, public_key: &str, preshared_key: &str, allowed_ips: &str) -> Result<()>;

    /// Remove a peer; removing an absent key is a no-op
    async fn remove_peer(&self, public_key: &str) -> Result<()>;

    /// One record per live peer, in interface order
    async fn peer_statuses(&self) -> Result<Vec<PeerDump>>;

    /// Generate a fresh key pair
    async fn generate_key_pair(&self) -> Result<KeyPair>;

    /// Generate a fresh preshared key
    async fn generate_preshared_key(&self) -> Result<String>;

    /// Apply pending interface-level configuration
    async fn reload(&self) -> Result<()>;
}

/// Build the controller the configuration selects
pub fn controller_from_config(config: &AwgAdminConfig) -> Result<Arc<dyn InterfaceController>> {
    let controller: Arc<dyn InterfaceController> = match config.interface.controller {
        ControllerKind::Process => Arc::new(ProcessInterfaceController::new(config)?),
        ControllerKind::Simulated => Arc::new(SimulatedInterfaceController::new(config)),
    };
    tracing::info!(
        "Using {} interface controller for {}",
        controller.kind(),
        config.interface.name
    );
    Ok(controller)
}

/// Validate a WireGuard key: base64 of exactly 32 bytes
pub fn validate_key(key: &str) -> Result<()> {
    if key.len() != 44 {
        return Err(Error::Validation(format!(
            "key must be 44 base64 characters, got {}",
            key.len()
        )));
    }
    let bytes = BASE64
        .decode(key)
        .map_err(|e| Error::Validation(format!("key is not valid base64: {}", e)))?;
    if bytes.len() != 32 {
        return Err(Error::Validation("key must decode to 32 bytes".into()));
    }
    Ok(())
}

/// Validate a single IP network in CIDR notation
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let (addr, len) = cidr
        .split_once('/')
        .ok_or_else(|| Error::Validation(format!("'{}' is not in CIDR form", cidr)))?;
    let ip: IpAddr = addr
        .parse()
        .map_err(|_| Error::Validation(format!("'{}' is not an IP address", addr)))?;
    let len: u8 = len
        .parse()
        .map_err(|_| Error::Validation(format!("'{}' is not a prefix length", len)))?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    if len > max {
        return Err(Error::Validation(format!("prefix length {} exceeds {}", len, max)));
    }
    Ok(())
}

/// Validate an interface name before it reaches a command line
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 15 {
        return Err(Error::Validation(
            "interface name must be 1-15 characters".into(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::Validation(format!(
            "interface name '{}' contains unsupported characters",
            name
        )));
    }
    Ok(())
}
