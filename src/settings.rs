//! Settings Service
//!
//! Reads and updates the persisted obfuscation and network overrides, and
//! summarizes interface health.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{subnet_prefix, AwgAdminConfig};
use crate::error::{Error, Result};
use crate::interface::{validate_cidr, ObfuscationParameters, ServerIdentity};
use crate::orchestrator::PeerOrchestrator;
use crate::render::CLIENT_ALLOWED_IPS;
use crate::store::{NetworkSettings, SettingsStore};

/// Partial obfuscation update; absent fields keep their effective value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationUpdate {
    pub jc: Option<u32>,
    pub jmin: Option<u32>,
    pub jmax: Option<u32>,
    pub s1: Option<u32>,
    pub s2: Option<u32>,
    pub h1: Option<u32>,
    pub h2: Option<u32>,
    pub h3: Option<u32>,
    pub h4: Option<u32>,
}

impl ObfuscationUpdate {
    fn apply(&self, base: ObfuscationParameters) -> ObfuscationParameters {
        ObfuscationParameters {
            jc: self.jc.unwrap_or(base.jc),
            jmin: self.jmin.unwrap_or(base.jmin),
            jmax: self.jmax.unwrap_or(base.jmax),
            s1: self.s1.unwrap_or(base.s1),
            s2: self.s2.unwrap_or(base.s2),
            h1: self.h1.unwrap_or(base.h1),
            h2: self.h2.unwrap_or(base.h2),
            h3: self.h3.unwrap_or(base.h3),
            h4: self.h4.unwrap_or(base.h4),
        }
    }
}

/// Partial network update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkUpdate {
    pub address: Option<String>,
    pub dns: Option<Vec<String>>,
    pub allowed_ips: Option<String>,
}

/// Everything the settings view shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub server: ServerIdentity,
    pub obfuscation: ObfuscationParameters,
    pub network: NetworkSettings,
}

/// Aggregate interface health from one status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub running: bool,
    pub interface_name: String,
    pub peer_count: usize,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
    pub last_handshake: Option<DateTime<Utc>>,
}

pub struct SettingsService {
    orchestrator: Arc<PeerOrchestrator>,
    store: SettingsStore,
    default_network: NetworkSettings,
    interface_name: String,
}

impl SettingsService {
    pub fn new(
        orchestrator: Arc<PeerOrchestrator>,
        store: SettingsStore,
        default_network: NetworkSettings,
        interface_name: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            default_network,
            interface_name: interface_name.into(),
        }
    }

    pub fn from_config(
        config: &AwgAdminConfig,
        orchestrator: Arc<PeerOrchestrator>,
        store: SettingsStore,
    ) -> Self {
        let default_network = NetworkSettings {
            address: config.interface.address.clone(),
            dns: config.interface.dns.clone(),
            allowed_ips: CLIENT_ALLOWED_IPS.to_string(),
        };
        Self::new(orchestrator, store, default_network, config.interface.name.clone())
    }

    /// Server identity with effective obfuscation and network settings
    pub async fn settings(&self) -> Result<ServerSettings> {
        Ok(ServerSettings {
            server: self.orchestrator.server_identity().await?,
            obfuscation: self.orchestrator.obfuscation_parameters().await?,
            network: self.network().await?,
        })
    }

    /// Persisted network override, else the configured network
    pub async fn network(&self) -> Result<NetworkSettings> {
        Ok(self
            .store
            .network()
            .await?
            .unwrap_or_else(|| self.default_network.clone()))
    }

    /// Merge `update` over the effective parameters and persist the result.
    /// Nothing is saved if the merged parameters are out of bounds.
    pub async fn update_obfuscation(&self, update: ObfuscationUpdate) -> Result<ObfuscationParameters> {
        let current = self.orchestrator.obfuscation_parameters().await?;
        let merged = update.apply(current);
        merged.validate()?;

        self.store.set_obfuscation(&merged).await?;
        tracing::info!(
            "Obfuscation settings updated; interface restart required to apply them"
        );
        Ok(merged)
    }

    /// Merge `update` over the effective network settings and persist them
    pub async fn update_network(&self, update: NetworkUpdate) -> Result<NetworkSettings> {
        if let Some(address) = &update.address {
            subnet_prefix(address).map_err(|_| {
                Error::Validation(format!(
                    "Address must be an IPv4 CIDR such as 10.0.0.1/24, got '{}'",
                    address
                ))
            })?;
        }
        if let Some(dns) = &update.dns {
            if dns.is_empty() {
                return Err(Error::Validation("At least one DNS server is required".into()));
            }
            for server in dns {
                server.parse::<Ipv4Addr>().map_err(|_| {
                    Error::Validation(format!("Invalid DNS server: {}", server))
                })?;
            }
        }
        if let Some(allowed_ips) = &update.allowed_ips {
            for cidr in allowed_ips.split(',').map(str::trim) {
                validate_cidr(cidr)?;
            }
        }

        let current = self.network().await?;
        let merged = NetworkSettings {
            address: update.address.unwrap_or(current.address),
            dns: update.dns.unwrap_or(current.dns),
            allowed_ips: update.allowed_ips.unwrap_or(current.allowed_ips),
        };

        self.store.set_network(&merged).await?;
        tracing::info!("Network settings updated: {} (dns {})", merged.address, merged.dns.join(", "));
        Ok(merged)
    }

    /// Interface health. A failing controller reports "not running".
    pub async fn server_status(&self) -> ServerStatus {
        let controller = self.orchestrator.controller();
        let snapshot = async {
            let identity = controller.server_identity().await?;
            let dumps = controller.peer_statuses().await?;
            Ok::<_, Error>((identity, dumps))
        };

        match snapshot.await {
            Ok((identity, dumps)) => ServerStatus {
                running: true,
                interface_name: identity.interface_name,
                peer_count: dumps.len(),
                transfer_rx: dumps.iter().map(|d| d.transfer_rx).sum(),
                transfer_tx: dumps.iter().map(|d| d.transfer_tx).sum(),
                last_handshake: dumps
                    .iter()
                    .filter_map(|d| d.latest_handshake)
                    .max()
                    .and_then(|t| Utc.timestamp_opt(t, 0).single()),
            },
            Err(e) => {
                tracing::warn!("Interface {} is not answering: {}", self.interface_name, e);
                ServerStatus {
                    running: false,
                    interface_name: self.interface_name.clone(),
                    peer_count: 0,
                    transfer_rx: 0,
                    transfer_tx: 0,
                    last_handshake: None,
                }
            }
        }
    }
}
