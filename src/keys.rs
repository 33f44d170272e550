//! Key material generation
//!
//! Key pairs and preshared keys come either from the `wg` tool or, for
//! development and tests, from the local CSPRNG using X25519.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};
use crate::interface::{validate_key, CommandRunner};

/// WireGuard key pair, both halves base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

enum Source {
    Process { wg_binary: String, runner: CommandRunner },
    Local,
}

/// Produces key pairs and preshared keys
pub struct KeyMaterialGenerator {
    source: Source,
}

impl KeyMaterialGenerator {
    /// Generate keys with `wg genkey`, `wg pubkey` and `wg genpsk`
    pub fn process(wg_binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            source: Source::Process {
                wg_binary: wg_binary.into(),
                runner: CommandRunner::new(timeout),
            },
        }
    }

    /// Generate keys in-process
    pub fn local() -> Self {
        Self { source: Source::Local }
    }

    /// Generate a new key pair
    pub async fn generate_key_pair(&self) -> Result<KeyPair> {
        match &self.source {
            Source::Process { wg_binary, runner } => {
                let private_key = runner.run(wg_binary, &["genkey"]).await?.trim().to_string();
                checked(&private_key, "wg genkey")?;

                // Private key goes through stdin, never argv
                let public_key = runner
                    .run_with_stdin(wg_binary, &["pubkey"], Some(&private_key))
                    .await?
                    .trim()
                    .to_string();
                checked(&public_key, "wg pubkey")?;

                Ok(KeyPair { private_key, public_key })
            }
            Source::Local => {
                let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
                let public = PublicKey::from(&secret);
                Ok(KeyPair {
                    private_key: BASE64.encode(secret.to_bytes()),
                    public_key: BASE64.encode(public.as_bytes()),
                })
            }
        }
    }

    /// Generate a new preshared key
    pub async fn generate_preshared_key(&self) -> Result<String> {
        match &self.source {
            Source::Process { wg_binary, runner } => {
                let psk = runner.run(wg_binary, &["genpsk"]).await?.trim().to_string();
                checked(&psk, "wg genpsk")?;
                Ok(psk)
            }
            Source::Local => Ok(random_key()),
        }
    }
}

/// 32 random bytes, base64 encoded
pub fn random_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Derive the public key for a base64 private key
pub fn public_key_for(private_key: &str) -> Result<String> {
    validate_key(private_key)?;
    let bytes = BASE64
        .decode(private_key)
        .map_err(|e| Error::Validation(format!("private key is not valid base64: {}", e)))?;
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes);
    let secret = StaticSecret::from(key_bytes);
    Ok(BASE64.encode(PublicKey::from(&secret).as_bytes()))
}

fn checked(key: &str, command: &str) -> Result<()> {
    validate_key(key)
        .map_err(|e| Error::InterfaceCommand(format!("{} returned an unusable key: {}", command, e)))
}
