//! Peer Storage Module
//!
//! Durable peer roster and persisted settings, backed by SQLite.

mod peers;
mod settings;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};

pub use peers::SqlitePeerRepository;
pub use settings::{NetworkSettings, SettingsStore};

/// First host octet handed to peers (.1 belongs to the server)
pub const FIRST_PEER_OCTET: u8 = 2;
/// Last host octet handed to peers
pub const LAST_PEER_OCTET: u8 = 254;

/// Durable VPN peer record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Unique identifier
    pub id: String,
    /// Human label
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: String,
    /// Tunnel address without prefix length, e.g. `10.8.0.2`
    pub address: String,
    /// Optional expiry
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the peer should be live on the interface
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Peer {
    /// The peer's address as a single-host network
    pub fn allowed_ips(&self) -> String {
        format!("{}/32", self.address)
    }

    /// Whether the peer's expiry has passed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Fields of a peer about to be created
#[derive(Debug, Clone)]
pub struct NewPeer {
    pub name: String,
    pub public_key: String,
    pub private_key: String,
    pub preshared_key: String,
    pub address: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial update: only `Some` fields change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl PeerUpdate {
    /// Update that only toggles `enabled`
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    /// True when no field is supplied
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.expires_at.is_none() && self.enabled.is_none()
    }
}

/// CRUD and address allocation over durable peer records
#[async_trait::async_trait]
pub trait PeerRepository: Send + Sync {
    /// All peers, oldest first
    async fn find_all(&self) -> Result<Vec<Peer>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Peer>>;

    async fn find_by_public_key(&self, public_key: &str) -> Result<Option<Peer>>;

    /// Insert a new enabled peer with a fresh id and creation time
    async fn create(&self, peer: NewPeer) -> Result<Peer>;

    /// Apply a partial update; false if the peer does not exist
    async fn update(&self, id: &str, update: &PeerUpdate) -> Result<bool>;

    /// Delete a peer; false if it does not exist
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Lowest free address in `<subnet_prefix>.2` ..= `<subnet_prefix>.254`
    async fn next_available_address(&self, subnet_prefix: &str) -> Result<String>;
}

/// Pick the lowest free host octet in the pool.
///
/// Only addresses inside `subnet_prefix` count as used; anything else in
/// `used` is ignored.
pub fn next_free_address<'a, I>(subnet_prefix: &str, used: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut taken = [false; 256];
    let prefix = format!("{}.", subnet_prefix);
    for address in used {
        if let Some(octet) = address
            .strip_prefix(&prefix)
            .and_then(|rest| rest.parse::<u8>().ok())
        {
            taken[octet as usize] = true;
        }
    }

    (FIRST_PEER_OCTET..=LAST_PEER_OCTET)
        .find(|&octet| !taken[octet as usize])
        .map(|octet| format!("{}{}", prefix, octet))
        .ok_or_else(|| Error::PoolExhausted(subnet_prefix.to_string()))
}

/// Shared SQLite connection holding the peer and settings tables
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Create or open the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS peers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                public_key TEXT NOT NULL UNIQUE,
                private_key TEXT NOT NULL,
                preshared_key TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                expires_at TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub(crate) fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

pub(crate) fn decode_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Database(format!("bad timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_free_address_fills_gaps() {
        let used = ["10.8.0.2", "10.8.0.3", "10.8.0.5"];
        assert_eq!(next_free_address("10.8.0", used).unwrap(), "10.8.0.4");
    }

    #[test]
    fn test_next_free_address_empty_pool() {
        assert_eq!(next_free_address("10.8.0", []).unwrap(), "10.8.0.2");
    }

    #[test]
    fn test_next_free_address_ignores_other_subnets() {
        let used = ["10.9.0.2", "10.8.0.20", "10.8.0.2", "garbage", "10.8.0.x"];
        assert_eq!(next_free_address("10.8.0", used).unwrap(), "10.8.0.3");
        // Prefix match is on whole octets
        assert_eq!(next_free_address("10.8.0", ["10.8.00.2"]).unwrap(), "10.8.0.2");
    }

    #[test]
    fn test_next_free_address_exhausted() {
        let used: Vec<String> = (2..=254).map(|o| format!("10.8.0.{}", o)).collect();
        let result = next_free_address("10.8.0", used.iter().map(String::as_str));
        assert!(matches!(result, Err(Error::PoolExhausted(ref p)) if p == "10.8.0"));

        // Freeing one address makes it the next allocation
        let partial: Vec<&str> = used.iter().map(String::as_str).filter(|a| *a != "10.8.0.77").collect();
        assert_eq!(next_free_address("10.8.0", partial).unwrap(), "10.8.0.77");
    }

    #[test]
    fn test_time_round_trip() {
        let now = Utc::now();
        assert_eq!(decode_time(&encode_time(&now)).unwrap(), now);
        assert!(decode_time("yesterday").is_err());
    }

    #[test]
    fn test_peer_helpers() {
        let now = Utc::now();
        let peer = Peer {
            id: "id".into(),
            name: "alice".into(),
            public_key: "pk".into(),
            private_key: "sk".into(),
            preshared_key: "psk".into(),
            address: "10.8.0.2".into(),
            expires_at: Some(now),
            enabled: true,
            created_at: now,
        };
        assert_eq!(peer.allowed_ips(), "10.8.0.2/32");
        assert!(peer.is_expired(now));
        assert!(!peer.is_expired(now - chrono::Duration::seconds(1)));
        assert!(PeerUpdate::default().is_empty());
        assert!(!PeerUpdate::enabled(false).is_empty());
    }
}
