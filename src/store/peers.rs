//! SQLite Peer Repository
//!
//! Persistent storage for durable peer records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{decode_time, encode_time, next_free_address, Database, NewPeer, Peer, PeerRepository, PeerUpdate};
use crate::error::Result;

const PEER_COLUMNS: &str =
    "id, name, public_key, private_key, preshared_key, address, expires_at, enabled, created_at";

/// Peer repository backed by the `peers` table
#[derive(Clone)]
pub struct SqlitePeerRepository {
    db: Database,
}

/// Raw column values, converted to [`Peer`] outside the row callback
struct PeerRow {
    id: String,
    name: String,
    public_key: String,
    private_key: String,
    preshared_key: String,
    address: String,
    expires_at: Option<String>,
    enabled: bool,
    created_at: String,
}

impl PeerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            public_key: row.get(2)?,
            private_key: row.get(3)?,
            preshared_key: row.get(4)?,
            address: row.get(5)?,
            expires_at: row.get(6)?,
            enabled: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_peer(self) -> Result<Peer> {
        Ok(Peer {
            id: self.id,
            name: self.name,
            public_key: self.public_key,
            private_key: self.private_key,
            preshared_key: self.preshared_key,
            address: self.address,
            expires_at: self.expires_at.as_deref().map(decode_time).transpose()?,
            enabled: self.enabled,
            created_at: decode_time(&self.created_at)?,
        })
    }
}

impl SqlitePeerRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<Peer>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM peers WHERE {} = ?1", PEER_COLUMNS, column),
                params![value],
                PeerRow::from_row,
            )
            .optional()?;
        row.map(PeerRow::into_peer).transpose()
    }
}

#[async_trait::async_trait]
impl PeerRepository for SqlitePeerRepository {
    async fn find_all(&self) -> Result<Vec<Peer>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM peers ORDER BY created_at, rowid",
            PEER_COLUMNS
        ))?;
        let rows = stmt.query_map([], PeerRow::from_row)?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?.into_peer()?);
        }
        Ok(peers)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Peer>> {
        self.find_one("id", id).await
    }

    async fn find_by_public_key(&self, public_key: &str) -> Result<Option<Peer>> {
        self.find_one("public_key", public_key).await
    }

    async fn create(&self, new: NewPeer) -> Result<Peer> {
        let peer = Peer {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            public_key: new.public_key,
            private_key: new.private_key,
            preshared_key: new.preshared_key,
            address: new.address,
            expires_at: new.expires_at,
            enabled: true,
            created_at: Utc::now(),
        };

        let conn = self.db.lock().await;
        conn.execute(
            r#"
            INSERT INTO peers (id, name, public_key, private_key, preshared_key,
                               address, expires_at, enabled, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                peer.id,
                peer.name,
                peer.public_key,
                peer.private_key,
                peer.preshared_key,
                peer.address,
                peer.expires_at.as_ref().map(encode_time),
                peer.enabled,
                encode_time(&peer.created_at),
            ],
        )?;

        Ok(peer)
    }

    async fn update(&self, id: &str, update: &PeerUpdate) -> Result<bool> {
        let conn = self.db.lock().await;
        let changed = conn.execute(
            r#"
            UPDATE peers SET
                name = COALESCE(?2, name),
                expires_at = COALESCE(?3, expires_at),
                enabled = COALESCE(?4, enabled)
            WHERE id = ?1
            "#,
            params![
                id,
                update.name,
                update.expires_at.as_ref().map(encode_time),
                update.enabled,
            ],
        )?;
        Ok(changed > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.lock().await;
        let deleted = conn.execute("DELETE FROM peers WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    async fn next_available_address(&self, subnet_prefix: &str) -> Result<String> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT address FROM peers")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut used = Vec::new();
        for row in rows {
            used.push(row?);
        }
        next_free_address(subnet_prefix, used.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::tempdir;

    fn new_peer(name: &str, address: &str) -> NewPeer {
        NewPeer {
            name: name.to_string(),
            public_key: crate::keys::random_key(),
            private_key: crate::keys::random_key(),
            preshared_key: crate::keys::random_key(),
            address: address.to_string(),
            expires_at: None,
        }
    }

    fn repo() -> SqlitePeerRepository {
        SqlitePeerRepository::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = repo();
        let created = repo.create(new_peer("alice", "10.8.0.2")).await.unwrap();
        assert!(created.enabled);
        assert!(uuid::Uuid::parse_str(&created.id).is_ok());

        let by_id = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(by_id, created);

        let by_key = repo.find_by_public_key(&created.public_key).await.unwrap().unwrap();
        assert_eq!(by_key.id, created.id);

        assert!(repo.find_by_id("missing").await.unwrap().is_none());
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let repo = repo();
        let expiry = Utc::now() + chrono::Duration::days(30);
        let mut new = new_peer("alice", "10.8.0.2");
        new.expires_at = Some(expiry);
        let peer = repo.create(new).await.unwrap();

        assert!(repo.update(&peer.id, &PeerUpdate::enabled(false)).await.unwrap());
        let updated = repo.find_by_id(&peer.id).await.unwrap().unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.name, "alice");
        assert_eq!(updated.expires_at, Some(expiry));

        let rename = PeerUpdate {
            name: Some("alice-laptop".into()),
            ..Default::default()
        };
        assert!(repo.update(&peer.id, &rename).await.unwrap());
        let updated = repo.find_by_id(&peer.id).await.unwrap().unwrap();
        assert_eq!(updated.name, "alice-laptop");
        assert!(!updated.enabled);

        assert!(!repo.update("missing", &rename).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repo();
        let peer = repo.create(new_peer("alice", "10.8.0.2")).await.unwrap();
        assert!(repo.delete(&peer.id).await.unwrap());
        assert!(!repo.delete(&peer.id).await.unwrap());
        assert!(repo.find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_available_address() {
        let repo = repo();
        assert_eq!(repo.next_available_address("10.8.0").await.unwrap(), "10.8.0.2");

        for address in ["10.8.0.2", "10.8.0.3", "10.8.0.5"] {
            repo.create(new_peer("p", address)).await.unwrap();
        }
        assert_eq!(repo.next_available_address("10.8.0").await.unwrap(), "10.8.0.4");
    }

    #[tokio::test]
    async fn test_duplicate_address_is_rejected() {
        let repo = repo();
        repo.create(new_peer("alice", "10.8.0.2")).await.unwrap();
        let result = repo.create(new_peer("bob", "10.8.0.2")).await;
        assert!(matches!(result, Err(Error::Database(_))));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("peers.db");

        let id = {
            let repo = SqlitePeerRepository::new(Database::open(&path).unwrap());
            repo.create(new_peer("alice", "10.8.0.2")).await.unwrap().id
        };

        let repo = SqlitePeerRepository::new(Database::open(&path).unwrap());
        let peer = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(peer.name, "alice");
        assert_eq!(peer.address, "10.8.0.2");
    }
}
