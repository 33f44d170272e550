//! Process Interface Controller
//!
//! Drives a live interface through the `awg` control tool and `wg` key
//! tool, one subprocess per operation.

use std::io::Write;

use tempfile::NamedTempFile;

use super::output::{extract_number, extract_value, parse_peer_dump};
use super::{
    validate_cidr, validate_interface_name, validate_key, CommandRunner, InterfaceController,
    KeyPair, ObfuscationParameters, PeerDump, ServerIdentity,
};
use crate::config::{AwgAdminConfig, KeygenMode};
use crate::error::{Error, Result};
use crate::keys::KeyMaterialGenerator;

/// Interface controller backed by the awg/wg command line tools
pub struct ProcessInterfaceController {
    interface_name: String,
    awg_binary: String,
    endpoint: String,
    listen_port: u16,
    address: String,
    dns: Vec<String>,
    /// Reported when `awg show` has no public key line
    fallback_public_key: String,
    /// Per-field fallback when `awg show` omits an obfuscation value
    fallback_obfuscation: ObfuscationParameters,
    runner: CommandRunner,
    keys: KeyMaterialGenerator,
}

impl ProcessInterfaceController {
    /// Create a controller from configuration
    pub fn new(config: &AwgAdminConfig) -> Result<Self> {
        let iface = &config.interface;
        validate_interface_name(&iface.name)
            .map_err(|e| Error::Config(format!("interface.name: {}", e)))?;

        let keys = match iface.keygen {
            KeygenMode::Process => {
                KeyMaterialGenerator::process(iface.wg_binary.clone(), iface.command_timeout())
            }
            KeygenMode::Local => KeyMaterialGenerator::local(),
        };

        Ok(Self {
            interface_name: iface.name.clone(),
            awg_binary: iface.awg_binary.clone(),
            endpoint: iface.endpoint.clone(),
            listen_port: iface.listen_port,
            address: iface.address.clone(),
            dns: iface.dns.clone(),
            fallback_public_key: iface.public_key.clone(),
            fallback_obfuscation: config.fallback_obfuscation(),
            runner: CommandRunner::new(iface.command_timeout()),
            keys,
        })
    }

    async fn awg(&self, args: &[&str]) -> Result<String> {
        self.runner.run(&self.awg_binary, args).await
    }

    async fn show(&self) -> Result<String> {
        self.awg(&["show", &self.interface_name]).await
    }
}

/// A token that fails validation never reaches the tool; report it as an
/// interface failure like any other rejected command.
fn unsafe_token(check: Result<()>) -> Result<()> {
    check.map_err(|e| match e {
        Error::Validation(reason) => Error::InterfaceCommand(format!("refusing unsafe token: {}", reason)),
        other => other,
    })
}

/// Write the preshared key to an owner-only temp file. The file is removed
/// when the returned handle is dropped.
fn write_psk_file(preshared_key: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("awg_psk_")
        .suffix(".key")
        .tempfile()?;
    file.write_all(preshared_key.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(file)
}

#[async_trait::async_trait]
impl InterfaceController for ProcessInterfaceController {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn server_identity(&self) -> Result<ServerIdentity> {
        let output = self.show().await?;

        Ok(ServerIdentity {
            interface_name: self.interface_name.clone(),
            public_key: extract_value(&output, "public key")
                .unwrap_or_else(|| self.fallback_public_key.clone()),
            listen_port: extract_number(&output, "listening port").unwrap_or(self.listen_port),
            endpoint: self.endpoint.clone(),
            subnet: self.address.clone(),
            dns: self.dns.clone(),
        })
    }

    async fn obfuscation_parameters(&self) -> Result<ObfuscationParameters> {
        let output = match self.show().await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Falling back to configured obfuscation parameters: {}", e);
                String::new()
            }
        };

        let fallback = &self.fallback_obfuscation;
        Ok(ObfuscationParameters {
            jc: extract_number(&output, "jc").unwrap_or(fallback.jc),
            jmin: extract_number(&output, "jmin").unwrap_or(fallback.jmin),
            jmax: extract_number(&output, "jmax").unwrap_or(fallback.jmax),
            s1: extract_number(&output, "s1").unwrap_or(fallback.s1),
            s2: extract_number(&output, "s2").unwrap_or(fallback.s2),
            h1: extract_number(&output, "h1").unwrap_or(fallback.h1),
            h2: extract_number(&output, "h2").unwrap_or(fallback.h2),
            h3: extract_number(&output, "h3").unwrap_or(fallback.h3),
            h4: extract_number(&output, "h4").unwrap_or(fallback.h4),
        })
    }

    async fn add_peer(&self, public_key: &str, preshared_key: &str, allowed_ips: &str) -> Result<()> {
        unsafe_token(validate_key(public_key))?;
        unsafe_token(validate_key(preshared_key))?;
        unsafe_token(validate_cidr(allowed_ips))?;

        let psk_file = write_psk_file(preshared_key)?;
        let psk_path = psk_file
            .path()
            .to_str()
            .ok_or_else(|| Error::Internal("temporary path is not valid UTF-8".into()))?
            .to_string();

        let result = self
            .awg(&[
                "set",
                &self.interface_name,
                "peer",
                public_key,
                "preshared-key",
                &psk_path,
                "allowed-ips",
                allowed_ips,
            ])
            .await;

        if let Err(e) = psk_file.close() {
            tracing::warn!("Failed to remove preshared key file {}: {}", psk_path, e);
        }

        result.map(|_| ())
    }

    async fn remove_peer(&self, public_key: &str) -> Result<()> {
        unsafe_token(validate_key(public_key))?;
        self.awg(&["set", &self.interface_name, "peer", public_key, "remove"])
            .await
            .map(|_| ())
    }

    async fn peer_statuses(&self) -> Result<Vec<PeerDump>> {
        let output = self.awg(&["show", &self.interface_name, "dump"]).await?;
        Ok(parse_peer_dump(&output))
    }

    async fn generate_key_pair(&self) -> Result<KeyPair> {
        self.keys.generate_key_pair().await
    }

    async fn generate_preshared_key(&self) -> Result<String> {
        self.keys.generate_preshared_key().await
    }

    async fn reload(&self) -> Result<()> {
        // Userspace awg-go applies `awg set` immediately
        tracing::debug!("Reload requested for {}; nothing pending", self.interface_name);
        Ok(())
    }
}
