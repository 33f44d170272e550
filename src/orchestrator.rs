//! Peer Orchestrator
//!
//! Single entry point for peer lifecycle operations. Keeps durable peer
//! records and the live interface in agreement on a best-effort basis:
//! the record is written first and the interface call follows. Interface
//! failures are surfaced to the caller without rolling back the record, so
//! a peer that failed to go live stays visible and can be retried or
//! deleted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{subnet_prefix, AwgAdminConfig};
use crate::error::{Error, Result};
use crate::interface::{InterfaceController, ObfuscationParameters, PeerDump, ServerIdentity};
use crate::render::render_client_config;
use crate::store::{NewPeer, Peer, PeerRepository, PeerUpdate, SettingsStore};

/// A handshake younger than this many seconds means the peer is online
pub const ONLINE_THRESHOLD_SECS: i64 = 180;

/// Longest accepted peer name
const MAX_NAME_LEN: usize = 255;

/// Runtime status of one peer, recomputed on every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRuntimeStatus {
    pub peer_id: String,
    pub online: bool,
    pub last_handshake: Option<DateTime<Utc>>,
    pub transfer_rx: u64,
    pub transfer_tx: u64,
    pub endpoint: Option<String>,
}

impl PeerRuntimeStatus {
    /// Status of a peer the interface does not report
    pub fn offline(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            online: false,
            last_handshake: None,
            transfer_rx: 0,
            transfer_tx: 0,
            endpoint: None,
        }
    }

    fn from_dump(peer_id: &str, dump: &PeerDump, now: i64) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            online: is_online(dump.latest_handshake, now),
            last_handshake: dump
                .latest_handshake
                .and_then(|t| Utc.timestamp_opt(t, 0).single()),
            transfer_rx: dump.transfer_rx,
            transfer_tx: dump.transfer_tx,
            endpoint: dump.endpoint.clone(),
        }
    }
}

/// Outcome of pushing the durable roster onto the interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Enabled peers (re)added
    pub added: usize,
    /// Disabled peers removed
    pub removed: usize,
    /// Peers whose interface call failed
    pub failed: usize,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default)]
pub struct ExpiryReport {
    /// Records now disabled, including those whose interface removal failed
    pub disabled: Vec<Peer>,
    /// Peers whose interface removal failed; reconcile removes them later
    pub failed: usize,
}

/// Online iff a handshake happened within [`ONLINE_THRESHOLD_SECS`] of `now`
pub fn is_online(latest_handshake: Option<i64>, now: i64) -> bool {
    match latest_handshake {
        Some(handshake) if handshake > 0 => now - handshake < ONLINE_THRESHOLD_SECS,
        _ => false,
    }
}

/// Join peers with one status snapshot by public key
pub fn join_statuses(
    peers: Vec<Peer>,
    dumps: &[PeerDump],
    now: i64,
) -> Vec<(Peer, PeerRuntimeStatus)> {
    let by_key: HashMap<&str, &PeerDump> = dumps
        .iter()
        .map(|d| (d.public_key.as_str(), d))
        .collect();

    peers
        .into_iter()
        .map(|peer| {
            let status = match by_key.get(peer.public_key.as_str()) {
                Some(dump) => PeerRuntimeStatus::from_dump(&peer.id, dump, now),
                None => PeerRuntimeStatus::offline(&peer.id),
            };
            (peer, status)
        })
        .collect()
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("peer name cannot be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "peer name cannot exceed {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

/// Coordinates the peer repository and the interface controller
pub struct PeerOrchestrator {
    repository: Arc<dyn PeerRepository>,
    controller: Arc<dyn InterfaceController>,
    settings: Option<SettingsStore>,
    configured_obfuscation: Option<ObfuscationParameters>,
    /// Server address from configuration, e.g. `10.8.0.1/24`
    server_address: String,
    /// Serializes allocate-then-insert so two creates never share an address
    allocation: Mutex<()>,
}

impl PeerOrchestrator {
    /// Create an orchestrator allocating from `server_address`'s /24
    pub fn new(
        repository: Arc<dyn PeerRepository>,
        controller: Arc<dyn InterfaceController>,
        server_address: impl Into<String>,
    ) -> Result<Self> {
        let server_address = server_address.into();
        subnet_prefix(&server_address)?;

        Ok(Self {
            repository,
            controller,
            settings: None,
            configured_obfuscation: None,
            server_address,
            allocation: Mutex::new(()),
        })
    }

    /// Create an orchestrator wired the way the configuration says
    pub fn from_config(
        config: &AwgAdminConfig,
        repository: Arc<dyn PeerRepository>,
        controller: Arc<dyn InterfaceController>,
        settings: SettingsStore,
    ) -> Result<Self> {
        Ok(Self::new(repository, controller, config.interface.address.clone())?
            .with_settings(settings)
            .with_configured_obfuscation(config.obfuscation.clone()))
    }

    /// Consult persisted overrides
    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Static obfuscation parameters that win over interface-reported ones
    pub fn with_configured_obfuscation(mut self, params: Option<ObfuscationParameters>) -> Self {
        self.configured_obfuscation = params;
        self
    }

    /// The interface controller in use
    pub fn controller(&self) -> &Arc<dyn InterfaceController> {
        &self.controller
    }

    /// All peers joined with one status snapshot
    pub async fn list_with_status(&self) -> Result<Vec<(Peer, PeerRuntimeStatus)>> {
        let peers = self.repository.find_all().await?;
        let dumps = self.controller.peer_statuses().await?;
        Ok(join_statuses(peers, &dumps, Utc::now().timestamp()))
    }

    /// All durable peers
    pub async fn list(&self) -> Result<Vec<Peer>> {
        self.repository.find_all().await
    }

    /// One peer by id
    pub async fn get(&self, id: &str) -> Result<Option<Peer>> {
        self.repository.find_by_id(id).await
    }

    /// Runtime status of one peer
    pub async fn status(&self, id: &str) -> Result<Option<PeerRuntimeStatus>> {
        let Some(peer) = self.repository.find_by_id(id).await? else {
            return Ok(None);
        };
        let dumps = self.controller.peer_statuses().await?;
        let now = Utc::now().timestamp();
        Ok(join_statuses(vec![peer], &dumps, now)
            .pop()
            .map(|(_, status)| status))
    }

    /// Create a peer: keys, address, record, then the interface.
    ///
    /// If the interface call fails the record stays (enabled but not live)
    /// and the interface error is returned.
    pub async fn create(&self, name: &str, expires_at: Option<DateTime<Utc>>) -> Result<Peer> {
        let name = validate_name(name)?;

        let keys = self.controller.generate_key_pair().await?;
        let preshared_key = self.controller.generate_preshared_key().await?;

        let peer = {
            let _guard = self.allocation.lock().await;
            let prefix = self.subnet_prefix().await?;
            let address = self.repository.next_available_address(&prefix).await?;

            self.repository
                .create(NewPeer {
                    name,
                    public_key: keys.public_key,
                    private_key: keys.private_key,
                    preshared_key,
                    address,
                    expires_at,
                })
                .await?
        };

        tracing::info!("Created peer {} ({}) at {}", peer.name, peer.id, peer.address);

        if let Err(e) = self
            .controller
            .add_peer(&peer.public_key, &peer.preshared_key, &peer.allowed_ips())
            .await
        {
            tracing::error!(
                "Peer {} was stored but could not be added to the interface: {}",
                peer.id,
                e
            );
            return Err(e);
        }

        Ok(peer)
    }

    /// Partial update. Enabling adds the peer to the interface, disabling
    /// removes it; unchanged `enabled` makes no interface call.
    pub async fn update(&self, id: &str, update: PeerUpdate) -> Result<Option<Peer>> {
        let mut update = update;
        if let Some(name) = &update.name {
            update.name = Some(validate_name(name)?);
        }

        let Some(before) = self.repository.find_by_id(id).await? else {
            return Ok(None);
        };

        if !self.repository.update(id, &update).await? {
            // Deleted between the read and the write
            return Ok(None);
        }

        match update.enabled {
            Some(true) if !before.enabled => {
                tracing::info!("Enabling peer {} ({})", before.name, before.id);
                self.controller
                    .add_peer(&before.public_key, &before.preshared_key, &before.allowed_ips())
                    .await?;
            }
            Some(false) if before.enabled => {
                tracing::info!("Disabling peer {} ({})", before.name, before.id);
                self.controller.remove_peer(&before.public_key).await?;
            }
            _ => {}
        }

        self.repository.find_by_id(id).await
    }

    /// Flip `enabled`
    pub async fn toggle(&self, id: &str) -> Result<Option<Peer>> {
        let Some(peer) = self.repository.find_by_id(id).await? else {
            return Ok(None);
        };
        self.update(id, PeerUpdate::enabled(!peer.enabled)).await
    }

    /// Remove from the interface, then delete the record. False if the peer
    /// does not exist. An interface failure leaves the record in place.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(peer) = self.repository.find_by_id(id).await? else {
            return Ok(false);
        };

        self.controller.remove_peer(&peer.public_key).await?;
        let deleted = self.repository.delete(id).await?;
        if deleted {
            tracing::info!("Deleted peer {} ({})", peer.name, peer.id);
        }
        Ok(deleted)
    }

    /// Render the peer's client configuration from live server data
    pub async fn render_client_config(&self, id: &str) -> Result<Option<String>> {
        let Some(peer) = self.repository.find_by_id(id).await? else {
            return Ok(None);
        };
        let server = self.server_identity().await?;
        let obfuscation = self.obfuscation_parameters().await?;
        Ok(Some(render_client_config(&peer, &server, &obfuscation)))
    }

    /// Server identity as reported by the interface, with the persisted
    /// network override applied
    pub async fn server_identity(&self) -> Result<ServerIdentity> {
        let mut identity = self.controller.server_identity().await?;
        if let Some(network) = self.network_override().await? {
            identity.subnet = network.address;
            identity.dns = network.dns;
        }
        Ok(identity)
    }

    /// Effective obfuscation parameters: persisted override, then static
    /// configuration, then whatever the interface reports
    pub async fn obfuscation_parameters(&self) -> Result<ObfuscationParameters> {
        if let Some(settings) = &self.settings {
            if let Some(params) = settings.obfuscation().await? {
                return Ok(params);
            }
        }
        if let Some(params) = &self.configured_obfuscation {
            return Ok(params.clone());
        }
        self.controller.obfuscation_parameters().await
    }

    /// Push every durable peer's expected state onto the interface.
    /// Live peers unknown to the roster are left untouched.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let peers = self.repository.find_all().await?;
        let mut report = ReconcileReport::default();

        for peer in &peers {
            let result = if peer.enabled {
                self.controller
                    .add_peer(&peer.public_key, &peer.preshared_key, &peer.allowed_ips())
                    .await
                    .map(|_| report.added += 1)
            } else {
                self.controller
                    .remove_peer(&peer.public_key)
                    .await
                    .map(|_| report.removed += 1)
            };

            if let Err(e) = result {
                report.failed += 1;
                tracing::error!("Failed to reconcile peer {} ({}): {}", peer.name, peer.id, e);
            }
        }

        tracing::info!(
            "Reconciled {} peers: {} added, {} removed, {} failed",
            peers.len(),
            report.added,
            report.removed,
            report.failed
        );
        Ok(report)
    }

    /// Disable every enabled peer whose expiry is at or before `now`.
    /// A failed interface removal is logged and the sweep moves on.
    pub async fn disable_expired(&self, now: DateTime<Utc>) -> Result<ExpiryReport> {
        let expired: Vec<Peer> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .filter(|p| p.enabled && p.is_expired(now))
            .collect();

        let mut report = ExpiryReport::default();
        for peer in expired {
            tracing::info!("Peer {} ({}) expired", peer.name, peer.id);
            match self.update(&peer.id, PeerUpdate::enabled(false)).await {
                Ok(Some(updated)) => report.disabled.push(updated),
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Failed to disable expired peer {} ({}): {}", peer.name, peer.id, e);
                    if let Some(stored) = self.repository.find_by_id(&peer.id).await? {
                        if !stored.enabled {
                            report.disabled.push(stored);
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Allocation prefix, honoring a persisted network override
    pub async fn subnet_prefix(&self) -> Result<String> {
        match self.network_override().await? {
            Some(network) => subnet_prefix(&network.address),
            None => subnet_prefix(&self.server_address),
        }
    }

    async fn network_override(&self) -> Result<Option<crate::store::NetworkSettings>> {
        match &self.settings {
            Some(settings) => settings.network().await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::testing::{Call, ScriptedController};
    use crate::store::{Database, NetworkSettings, SqlitePeerRepository};

    struct Harness {
        orchestrator: PeerOrchestrator,
        controller: Arc<ScriptedController>,
        settings: SettingsStore,
    }

    fn harness() -> Harness {
        let db = Database::open_in_memory().unwrap();
        let controller = Arc::new(ScriptedController::new());
        let settings = SettingsStore::new(db.clone());
        let orchestrator = PeerOrchestrator::new(
            Arc::new(SqlitePeerRepository::new(db)),
            controller.clone(),
            "10.8.0.1/24",
        )
        .unwrap()
        .with_settings(settings.clone());
        Harness {
            orchestrator,
            controller,
            settings,
        }
    }

    fn dump(public_key: &str, handshake: Option<i64>) -> PeerDump {
        PeerDump {
            public_key: public_key.to_string(),
            endpoint: Some("203.0.113.9:41000".into()),
            allowed_ips: "10.8.0.2/32".into(),
            latest_handshake: handshake,
            transfer_rx: 100,
            transfer_tx: 200,
        }
    }

    #[test]
    fn test_online_threshold() {
        let now = 1_700_000_000;
        assert!(is_online(Some(now - 60), now));
        assert!(!is_online(Some(now - 200), now));
        assert!(!is_online(Some(now - ONLINE_THRESHOLD_SECS), now));
        assert!(is_online(Some(now - ONLINE_THRESHOLD_SECS + 1), now));
        assert!(!is_online(None, now));
        assert!(!is_online(Some(0), now));
    }

    #[tokio::test]
    async fn test_create_allocates_sequential_addresses() {
        let h = harness();
        let alice = h.orchestrator.create("alice", None).await.unwrap();
        let bob = h.orchestrator.create("bob", None).await.unwrap();

        assert!(alice.address.ends_with(".2"));
        assert!(bob.address.ends_with(".3"));
        assert!(alice.enabled);
        assert_eq!(alice.expires_at, None);
        assert!(h.controller.is_live(&alice.public_key));
        assert_eq!(
            h.controller.calls()[0],
            Call::Add {
                public_key: alice.public_key.clone(),
                allowed_ips: "10.8.0.2/32".into()
            }
        );
    }

    #[tokio::test]
    async fn test_create_reuses_freed_address() {
        let h = harness();
        let a = h.orchestrator.create("a", None).await.unwrap();
        let _b = h.orchestrator.create("b", None).await.unwrap();
        let _c = h.orchestrator.create("c", None).await.unwrap();
        assert!(h.orchestrator.delete(&a.id).await.unwrap());

        let d = h.orchestrator.create("d", None).await.unwrap();
        assert_eq!(d.address, "10.8.0.2");
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_share_addresses() {
        let h = Arc::new(harness());
        let mut handles = Vec::new();
        for i in 0..20 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.orchestrator.create(&format!("peer-{}", i), None).await
            }));
        }

        let mut addresses = Vec::new();
        for handle in handles {
            addresses.push(handle.await.unwrap().unwrap().address);
        }
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 20);
    }

    #[tokio::test]
    async fn test_create_with_failing_interface_keeps_record() {
        let h = harness();
        h.controller.set_failing(true);

        let result = h.orchestrator.create("alice", None).await;
        assert!(matches!(result, Err(Error::InterfaceCommand(_))));

        let peers = h.orchestrator.list().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].name, "alice");
        assert!(peers[0].enabled);
        assert!(!h.controller.is_live(&peers[0].public_key));

        // Reconciliation repairs it once the interface is back
        h.controller.set_failing(false);
        let report = h.orchestrator.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport { added: 1, removed: 0, failed: 0 });
        assert!(h.controller.is_live(&peers[0].public_key));
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let h = harness();
        assert!(matches!(
            h.orchestrator.create("   ", None).await,
            Err(Error::Validation(_))
        ));
        assert!(h.orchestrator.list().await.unwrap().is_empty());
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pool_exhaustion() {
        let h = harness();
        for i in 2..=254 {
            h.orchestrator.create(&format!("p{}", i), None).await.unwrap();
        }
        h.controller.clear_calls();

        let result = h.orchestrator.create("one-too-many", None).await;
        assert!(matches!(result, Err(Error::PoolExhausted(_))));
        assert_eq!(h.orchestrator.list().await.unwrap().len(), 253);
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disable_triggers_single_remove() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();
        h.controller.clear_calls();

        let updated = h
            .orchestrator
            .update(&peer.id, PeerUpdate::enabled(false))
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.enabled);
        assert_eq!(h.controller.removes(), 1);
        assert_eq!(h.controller.adds(), 0);

        // Same update again is a no-op transition
        h.orchestrator
            .update(&peer.id, PeerUpdate::enabled(false))
            .await
            .unwrap();
        assert_eq!(h.controller.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_enable_re_adds_with_existing_keys() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();
        h.orchestrator
            .update(&peer.id, PeerUpdate::enabled(false))
            .await
            .unwrap();
        h.controller.clear_calls();

        let updated = h
            .orchestrator
            .update(&peer.id, PeerUpdate::enabled(true))
            .await
            .unwrap()
            .unwrap();
        assert!(updated.enabled);
        assert_eq!(updated.public_key, peer.public_key);
        assert_eq!(updated.private_key, peer.private_key);
        assert_eq!(updated.address, peer.address);
        assert_eq!(
            h.controller.calls(),
            vec![Call::Add {
                public_key: peer.public_key.clone(),
                allowed_ips: peer.allowed_ips()
            }]
        );
    }

    #[tokio::test]
    async fn test_toggle() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();

        let off = h.orchestrator.toggle(&peer.id).await.unwrap().unwrap();
        assert!(!off.enabled);
        assert!(!h.controller.is_live(&peer.public_key));

        let on = h.orchestrator.toggle(&peer.id).await.unwrap().unwrap();
        assert!(on.enabled);
        assert!(h.controller.is_live(&peer.public_key));

        assert!(h.orchestrator.toggle("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_without_enabled_makes_no_interface_call() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();
        h.controller.clear_calls();

        let expiry = Utc::now() + chrono::Duration::days(7);
        let updated = h
            .orchestrator
            .update(
                &peer.id,
                PeerUpdate {
                    name: Some("alice-phone".into()),
                    expires_at: Some(expiry),
                    enabled: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "alice-phone");
        assert_eq!(updated.expires_at, Some(expiry));
        assert!(updated.enabled);

        h.orchestrator
            .update(&peer.id, PeerUpdate::enabled(true))
            .await
            .unwrap();
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let h = harness();
        assert!(h
            .orchestrator
            .update("missing", PeerUpdate::enabled(false))
            .await
            .unwrap()
            .is_none());
        assert!(!h.orchestrator.delete("missing").await.unwrap());
        assert!(h.orchestrator.render_client_config("missing").await.unwrap().is_none());
        assert!(h.orchestrator.status("missing").await.unwrap().is_none());
        assert!(h.controller.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_even_when_disabled() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();
        h.orchestrator
            .update(&peer.id, PeerUpdate::enabled(false))
            .await
            .unwrap();
        h.controller.clear_calls();

        assert!(h.orchestrator.delete(&peer.id).await.unwrap());
        assert_eq!(h.controller.removes(), 1);
        assert!(h.orchestrator.get(&peer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_keeps_record_when_interface_fails() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();
        h.controller.set_failing(true);

        assert!(h.orchestrator.delete(&peer.id).await.is_err());
        assert!(h.orchestrator.get(&peer.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_with_status() {
        let h = harness();
        let now = Utc::now().timestamp();
        let recent = h.orchestrator.create("recent", None).await.unwrap();
        let stale = h.orchestrator.create("stale", None).await.unwrap();
        let never = h.orchestrator.create("never", None).await.unwrap();
        let missing = h.orchestrator.create("missing", None).await.unwrap();

        h.controller.set_dump(dump(&recent.public_key, Some(now - 60)));
        h.controller.set_dump(dump(&stale.public_key, Some(now - 200)));
        let mut never_dump = dump(&never.public_key, None);
        never_dump.endpoint = None;
        never_dump.transfer_rx = 0;
        never_dump.transfer_tx = 0;
        h.controller.set_dump(never_dump);

        let listed = h.orchestrator.list_with_status().await.unwrap();
        assert_eq!(listed.len(), 4);
        let status: HashMap<String, PeerRuntimeStatus> = listed
            .into_iter()
            .map(|(p, s)| (p.id, s))
            .collect();

        assert!(status[&recent.id].online);
        assert_eq!(status[&recent.id].transfer_rx, 100);
        assert_eq!(
            status[&recent.id].last_handshake.map(|t| t.timestamp()),
            Some(now - 60)
        );

        assert!(!status[&stale.id].online);
        assert!(status[&stale.id].last_handshake.is_some());

        assert!(!status[&never.id].online);
        assert_eq!(status[&never.id].last_handshake, None);
        assert_eq!(status[&never.id].transfer_tx, 0);

        assert_eq!(status[&missing.id], PeerRuntimeStatus::offline(&missing.id));

        let single = h.orchestrator.status(&recent.id).await.unwrap().unwrap();
        assert!(single.online);
    }

    #[tokio::test]
    async fn test_render_uses_current_server_data() {
        let h = harness();
        let peer = h.orchestrator.create("alice", None).await.unwrap();

        let first = h.orchestrator.render_client_config(&peer.id).await.unwrap().unwrap();
        assert!(first.contains(&format!("PrivateKey = {}", peer.private_key)));
        assert!(first.contains("Address = 10.8.0.2/32"));
        assert!(first.contains("Jc = 4"));

        // Server key rotated and obfuscation changed after the peer was created
        let rotated = crate::keys::random_key();
        h.controller.identity.lock().unwrap().public_key = rotated.clone();
        h.controller.obfuscation.lock().unwrap().jc = 9;

        let second = h.orchestrator.render_client_config(&peer.id).await.unwrap().unwrap();
        assert!(second.contains(&format!("PublicKey = {}", rotated)));
        assert!(second.contains("Jc = 9"));
    }

    #[tokio::test]
    async fn test_obfuscation_precedence() {
        let h = harness();
        let reported = h.orchestrator.obfuscation_parameters().await.unwrap();
        assert_eq!(reported, ObfuscationParameters::default());

        let configured = ObfuscationParameters { jc: 10, ..Default::default() };
        let orchestrator = h
            .orchestrator
            .with_configured_obfuscation(Some(configured.clone()));
        assert_eq!(orchestrator.obfuscation_parameters().await.unwrap(), configured);

        let persisted = ObfuscationParameters { jc: 20, ..Default::default() };
        h.settings.set_obfuscation(&persisted).await.unwrap();
        assert_eq!(orchestrator.obfuscation_parameters().await.unwrap(), persisted);
    }

    #[tokio::test]
    async fn test_network_override_moves_pool_and_dns() {
        let h = harness();
        h.settings
            .set_network(&NetworkSettings {
                address: "10.77.0.1/24".into(),
                dns: vec!["9.9.9.9".into()],
                allowed_ips: "0.0.0.0/0".into(),
            })
            .await
            .unwrap();

        let peer = h.orchestrator.create("alice", None).await.unwrap();
        assert_eq!(peer.address, "10.77.0.2");

        let identity = h.orchestrator.server_identity().await.unwrap();
        assert_eq!(identity.subnet, "10.77.0.1/24");
        assert_eq!(identity.dns, vec!["9.9.9.9"]);
    }

    #[tokio::test]
    async fn test_reconcile_removes_disabled_peers() {
        let h = harness();
        let a = h.orchestrator.create("a", None).await.unwrap();
        let b = h.orchestrator.create("b", None).await.unwrap();
        h.orchestrator
            .update(&b.id, PeerUpdate::enabled(false))
            .await
            .unwrap();
        h.controller.clear_calls();

        let report = h.orchestrator.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport { added: 1, removed: 1, failed: 0 });
        assert!(h.controller.is_live(&a.public_key));
        assert!(!h.controller.is_live(&b.public_key));

        h.controller.set_failing(true);
        let report = h.orchestrator.reconcile().await.unwrap();
        assert_eq!(report.failed, 2);
    }

    #[tokio::test]
    async fn test_disable_expired() {
        let h = harness();
        let now = Utc::now();
        let expired = h
            .orchestrator
            .create("expired", Some(now - chrono::Duration::hours(1)))
            .await
            .unwrap();
        let current = h
            .orchestrator
            .create("current", Some(now + chrono::Duration::hours(1)))
            .await
            .unwrap();
        let forever = h.orchestrator.create("forever", None).await.unwrap();
        h.controller.clear_calls();

        let report = h.orchestrator.disable_expired(now).await.unwrap();
        assert_eq!(report.failed, 0);
        let disabled = report.disabled;
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0].id, expired.id);
        assert!(!disabled[0].enabled);
        assert_eq!(
            h.controller.calls(),
            vec![Call::Remove { public_key: expired.public_key.clone() }]
        );

        assert!(h.orchestrator.get(&current.id).await.unwrap().unwrap().enabled);
        assert!(h.orchestrator.get(&forever.id).await.unwrap().unwrap().enabled);

        // Already disabled peers are not touched again
        assert!(h.orchestrator.disable_expired(now).await.unwrap().disabled.is_empty());
    }

    #[tokio::test]
    async fn test_disable_expired_continues_past_interface_failures() {
        let h = harness();
        let now = Utc::now();
        let first = h
            .orchestrator
            .create("first", Some(now - chrono::Duration::hours(2)))
            .await
            .unwrap();
        let second = h
            .orchestrator
            .create("second", Some(now - chrono::Duration::hours(1)))
            .await
            .unwrap();
        h.controller.clear_calls();
        h.controller.set_failing(true);

        let report = h.orchestrator.disable_expired(now).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.disabled.len(), 2);
        // Both removals were attempted
        assert_eq!(h.controller.removes(), 2);
        assert!(!h.orchestrator.get(&first.id).await.unwrap().unwrap().enabled);
        assert!(!h.orchestrator.get(&second.id).await.unwrap().unwrap().enabled);

        // Reconcile pulls the stale entries off the interface once it recovers
        h.controller.set_failing(false);
        let reconciled = h.orchestrator.reconcile().await.unwrap();
        assert_eq!(reconciled.removed, 2);
        assert!(!h.controller.is_live(&first.public_key));
        assert!(!h.controller.is_live(&second.public_key));
    }
}
