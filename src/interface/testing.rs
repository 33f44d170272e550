//! Scripted controller for unit tests: records every call and serves
//! whatever status the test put in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::{InterfaceController, KeyPair, ObfuscationParameters, PeerDump, ServerIdentity};
use crate::error::{Error, Result};
use crate::keys::KeyMaterialGenerator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Add { public_key: String, allowed_ips: String },
    Remove { public_key: String },
}

pub(crate) struct ScriptedController {
    pub(crate) identity: Mutex<ServerIdentity>,
    pub(crate) obfuscation: Mutex<ObfuscationParameters>,
    /// Status served for each live key; keys without an entry report nothing
    pub(crate) dumps: Mutex<HashMap<String, PeerDump>>,
    live: Mutex<Vec<String>>,
    calls: Mutex<Vec<Call>>,
    fail_interface: AtomicBool,
    keys: KeyMaterialGenerator,
}

impl ScriptedController {
    pub(crate) fn new() -> Self {
        Self {
            identity: Mutex::new(ServerIdentity {
                interface_name: "awg0".into(),
                public_key: crate::keys::random_key(),
                listen_port: 51820,
                endpoint: "vpn.example.com".into(),
                subnet: "10.8.0.1/24".into(),
                dns: vec!["1.1.1.1".into(), "8.8.8.8".into()],
            }),
            obfuscation: Mutex::new(ObfuscationParameters::default()),
            dumps: Mutex::new(HashMap::new()),
            live: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_interface: AtomicBool::new(false),
            keys: KeyMaterialGenerator::local(),
        }
    }

    /// Make add/remove/status fail until reset
    pub(crate) fn set_failing(&self, failing: bool) {
        self.fail_interface.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub(crate) fn adds(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Add { .. }))
            .count()
    }

    pub(crate) fn removes(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Remove { .. }))
            .count()
    }

    pub(crate) fn is_live(&self, public_key: &str) -> bool {
        self.live.lock().unwrap().iter().any(|k| k == public_key)
    }

    pub(crate) fn set_dump(&self, dump: PeerDump) {
        self.dumps.lock().unwrap().insert(dump.public_key.clone(), dump);
    }

    fn check(&self) -> Result<()> {
        if self.fail_interface.load(Ordering::SeqCst) {
            return Err(Error::InterfaceCommand("scripted failure".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InterfaceController for ScriptedController {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn server_identity(&self) -> Result<ServerIdentity> {
        Ok(self.identity.lock().unwrap().clone())
    }

    async fn obfuscation_parameters(&self) -> Result<ObfuscationParameters> {
        Ok(self.obfuscation.lock().unwrap().clone())
    }

    async fn add_peer(&self, public_key: &str, _preshared_key: &str, allowed_ips: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Add {
            public_key: public_key.to_string(),
            allowed_ips: allowed_ips.to_string(),
        });
        self.check()?;
        let mut live = self.live.lock().unwrap();
        if !live.iter().any(|k| k == public_key) {
            live.push(public_key.to_string());
        }
        Ok(())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Remove {
            public_key: public_key.to_string(),
        });
        self.check()?;
        self.live.lock().unwrap().retain(|k| k != public_key);
        Ok(())
    }

    async fn peer_statuses(&self) -> Result<Vec<PeerDump>> {
        self.check()?;
        let live = self.live.lock().unwrap().clone();
        let dumps = self.dumps.lock().unwrap();
        Ok(live.iter().filter_map(|k| dumps.get(k).cloned()).collect())
    }

    async fn generate_key_pair(&self) -> Result<KeyPair> {
        self.keys.generate_key_pair().await
    }

    async fn generate_preshared_key(&self) -> Result<String> {
        self.keys.generate_preshared_key().await
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}
