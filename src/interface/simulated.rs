//! Simulated Interface Controller
//!
//! Keeps peers in memory and invents runtime status, for local
//! development and tests.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;

use super::{InterfaceController, KeyPair, ObfuscationParameters, PeerDump, ServerIdentity};
use crate::config::AwgAdminConfig;
use crate::error::Result;
use crate::keys::KeyMaterialGenerator;

#[derive(Debug, Clone)]
struct SimulatedPeer {
    preshared_key: String,
    allowed_ips: String,
    added_at: i64,
}

/// In-memory interface controller
pub struct SimulatedInterfaceController {
    interface_name: String,
    server_public_key: String,
    listen_port: u16,
    endpoint: String,
    address: String,
    dns: Vec<String>,
    obfuscation: ObfuscationParameters,
    latency: Duration,
    keys: KeyMaterialGenerator,
    /// Peer table keyed by public key; insertion order is not kept
    peers: RwLock<HashMap<String, SimulatedPeer>>,
}

impl SimulatedInterfaceController {
    /// Create a simulated controller from configuration
    pub fn new(config: &AwgAdminConfig) -> Self {
        let iface = &config.interface;
        let server_public_key = if iface.public_key.is_empty() {
            crate::keys::random_key()
        } else {
            iface.public_key.clone()
        };

        Self {
            interface_name: format!("{}-sim", iface.name),
            server_public_key,
            listen_port: iface.listen_port,
            endpoint: iface.endpoint.clone(),
            address: iface.address.clone(),
            dns: iface.dns.clone(),
            obfuscation: config.fallback_obfuscation(),
            latency: iface.simulated_latency(),
            keys: KeyMaterialGenerator::local(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Number of peers currently on the simulated interface
    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Allowed addresses of a peer, if present
    pub async fn allowed_ips(&self, public_key: &str) -> Option<String> {
        self.peers
            .read()
            .await
            .get(public_key)
            .map(|p| p.allowed_ips.clone())
    }

    /// Preshared key of a peer, if present
    pub async fn preshared_key(&self, public_key: &str) -> Option<String> {
        self.peers
            .read()
            .await
            .get(public_key)
            .map(|p| p.preshared_key.clone())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait::async_trait]
impl InterfaceController for SimulatedInterfaceController {
    fn kind(&self) -> &'static str {
        "simulated"
    }

    async fn server_identity(&self) -> Result<ServerIdentity> {
        self.simulate_latency().await;
        Ok(ServerIdentity {
            interface_name: self.interface_name.clone(),
            public_key: self.server_public_key.clone(),
            listen_port: self.listen_port,
            endpoint: self.endpoint.clone(),
            subnet: self.address.clone(),
            dns: self.dns.clone(),
        })
    }

    async fn obfuscation_parameters(&self) -> Result<ObfuscationParameters> {
        self.simulate_latency().await;
        Ok(self.obfuscation.clone())
    }

    async fn add_peer(&self, public_key: &str, preshared_key: &str, allowed_ips: &str) -> Result<()> {
        self.simulate_latency().await;
        let mut peers = self.peers.write().await;
        peers.insert(
            public_key.to_string(),
            SimulatedPeer {
                preshared_key: preshared_key.to_string(),
                allowed_ips: allowed_ips.to_string(),
                added_at: chrono::Utc::now().timestamp(),
            },
        );
        tracing::debug!("Simulated peer set: {} ({} total)", allowed_ips, peers.len());
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        self.simulate_latency().await;
        self.peers.write().await.remove(public_key);
        Ok(())
    }

    async fn peer_statuses(&self) -> Result<Vec<PeerDump>> {
        self.simulate_latency().await;
        let now = chrono::Utc::now().timestamp();
        let peers = self.peers.read().await;
        let mut rng = rand::thread_rng();

        Ok(peers
            .iter()
            .map(|(public_key, peer)| {
                let online = rng.gen_bool(0.5);
                if online {
                    // Never report a handshake from before the peer existed
                    let handshake = (now - rng.gen_range(0..60)).max(peer.added_at);
                    PeerDump {
                        public_key: public_key.clone(),
                        endpoint: Some(format!(
                            "192.168.1.{}:{}",
                            rng.gen_range(1..=254),
                            rng.gen_range(1024..61024)
                        )),
                        allowed_ips: peer.allowed_ips.clone(),
                        latest_handshake: Some(handshake),
                        transfer_rx: rng.gen_range(0..100 * 1024 * 1024),
                        transfer_tx: rng.gen_range(0..50 * 1024 * 1024),
                    }
                } else {
                    PeerDump {
                        public_key: public_key.clone(),
                        endpoint: None,
                        allowed_ips: peer.allowed_ips.clone(),
                        latest_handshake: None,
                        transfer_rx: 0,
                        transfer_tx: 0,
                    }
                }
            })
            .collect())
    }

    async fn generate_key_pair(&self) -> Result<KeyPair> {
        self.simulate_latency().await;
        self.keys.generate_key_pair().await
    }

    async fn generate_preshared_key(&self) -> Result<String> {
        self.simulate_latency().await;
        self.keys.generate_preshared_key().await
    }

    async fn reload(&self) -> Result<()> {
        self.simulate_latency().await;
        Ok(())
    }
}
