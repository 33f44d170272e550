//! Persisted Settings
//!
//! Key/value settings stored as JSON documents in the `settings` table.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Database;
use crate::error::Result;
use crate::interface::ObfuscationParameters;

const KEY_OBFUSCATION: &str = "obfuscation";
const KEY_NETWORK: &str = "network";

/// Persisted network override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Server tunnel address in CIDR form
    pub address: String,
    /// DNS servers handed to clients
    pub dns: Vec<String>,
    /// Client-side allowed addresses
    pub allowed_ips: String,
}

/// Settings store sharing the peer database
#[derive(Clone)]
pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Raw value of a setting
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Store a raw setting value
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.lock().await;
        conn.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Persisted obfuscation override, if any
    pub async fn obfuscation(&self) -> Result<Option<ObfuscationParameters>> {
        self.get_json(KEY_OBFUSCATION).await
    }

    /// Persist an obfuscation override
    pub async fn set_obfuscation(&self, params: &ObfuscationParameters) -> Result<()> {
        self.set_json(KEY_OBFUSCATION, params).await
    }

    /// Persisted network override, if any
    pub async fn network(&self) -> Result<Option<NetworkSettings>> {
        self.get_json(KEY_NETWORK).await
    }

    /// Persist a network override
    pub async fn set_network(&self, settings: &NetworkSettings) -> Result<()> {
        self.set_json(KEY_NETWORK, settings).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // An unreadable override behaves like no override
                tracing::warn!("Ignoring unreadable '{}' setting: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }
}
