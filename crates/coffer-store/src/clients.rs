use chrono::Utc;
use coffer_shared::ClientId;
use rusqlite::{params, OptionalExtension};

use crate::database::{client_id_column, timestamp_column, Database};
use crate::error::{Result, StoreError};
use crate::models::ClientRecord;

impl Database {
    /// Register a new client under a unique `name` and allocate its id.
    /// Key fields start out empty.
    pub fn register(&self, name: &str) -> Result<ClientId> {
        self.write(|conn| {
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM clients WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::DuplicateName(name.to_string()));
            }

            let id = ClientId::new();
            conn.execute(
                "INSERT INTO clients (id, name, last_seen) VALUES (?1, ?2, ?3)",
                params![&id.as_bytes()[..], name, Utc::now().to_rfc3339()],
            )?;

            tracing::info!(client = %id, name, "registered client");
            Ok(id)
        })
    }

    /// Store the client's public key and the freshly issued session key.
    pub fn set_keys(&self, id: ClientId, public_key: &[u8], session_key: &[u8]) -> Result<()> {
        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE clients SET public_key = ?1, session_key = ?2 WHERE id = ?3",
                params![public_key, session_key, &id.as_bytes()[..]],
            )?;
            if affected == 0 {
                return Err(StoreError::UnknownClient(id));
            }
            Ok(())
        })
    }

    pub fn get_session_key(&self, id: ClientId) -> Result<Vec<u8>> {
        self.read(|conn| {
            conn.query_row(
                "SELECT session_key FROM clients WHERE id = ?1",
                params![&id.as_bytes()[..]],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::UnknownClient(id))
        })
    }

    pub fn exists(&self, id: ClientId) -> Result<bool> {
        self.read(|conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM clients WHERE id = ?1)",
                params![&id.as_bytes()[..]],
                |row| row.get(0),
            )?)
        })
    }

    pub fn touch_last_seen(&self, id: ClientId) -> Result<()> {
        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE clients SET last_seen = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), &id.as_bytes()[..]],
            )?;
            if affected == 0 {
                return Err(StoreError::UnknownClient(id));
            }
            Ok(())
        })
    }

    pub fn client(&self, id: ClientId) -> Result<ClientRecord> {
        self.read(|conn| {
            conn.query_row(
                "SELECT id, name, public_key, session_key, last_seen FROM clients WHERE id = ?1",
                params![&id.as_bytes()[..]],
                row_to_client,
            )
            .optional()?
            .ok_or(StoreError::UnknownClient(id))
        })
    }

    pub fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, public_key, session_key, last_seen FROM clients ORDER BY name ASC",
            )?;
            let rows = stmt.query_map([], row_to_client)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()
                .map_err(StoreError::Sqlite)
        })
    }
}

fn row_to_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRecord> {
    Ok(ClientRecord {
        id: client_id_column(row, 0)?,
        name: row.get(1)?,
        public_key: row.get(2)?,
        session_key: row.get(3)?,
        last_seen: timestamp_column(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_at(&dir.path().join("registry.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_register_and_fetch() {
        let (db, _dir) = test_db();
        let id = db.register("alice").unwrap();

        let client = db.client(id).unwrap();
        assert_eq!(client.id, id);
        assert_eq!(client.name, "alice");
        assert!(client.public_key.is_empty());
        assert!(client.session_key.is_empty());
        assert!(db.exists(id).unwrap());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (db, _dir) = test_db();
        db.register("alice").unwrap();

        let err = db.register("alice").unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(ref n) if n == "alice"));

        let clients = db.list_clients().unwrap();
        assert_eq!(clients.iter().filter(|c| c.name == "alice").count(), 1);
    }

    #[test]
    fn test_set_keys_and_session_key() {
        let (db, _dir) = test_db();
        let id = db.register("alice").unwrap();

        db.set_keys(id, b"public-key-der", &[1u8; 16]).unwrap();
        assert_eq!(db.get_session_key(id).unwrap(), vec![1u8; 16]);

        // every key exchange replaces the session key
        db.set_keys(id, b"public-key-der", &[2u8; 16]).unwrap();
        assert_eq!(db.get_session_key(id).unwrap(), vec![2u8; 16]);
        assert_eq!(db.client(id).unwrap().public_key, b"public-key-der");
    }

    #[test]
    fn test_unknown_client_operations() {
        let (db, _dir) = test_db();
        let ghost = ClientId::new();

        assert!(!db.exists(ghost).unwrap());
        assert!(matches!(
            db.set_keys(ghost, b"pk", b"sk").unwrap_err(),
            StoreError::UnknownClient(id) if id == ghost
        ));
        assert!(matches!(
            db.get_session_key(ghost).unwrap_err(),
            StoreError::UnknownClient(_)
        ));
        assert!(matches!(
            db.touch_last_seen(ghost).unwrap_err(),
            StoreError::UnknownClient(_)
        ));
        assert!(matches!(db.client(ghost).unwrap_err(), StoreError::UnknownClient(_)));
    }

    #[test]
    fn test_touch_last_seen_advances() {
        let (db, _dir) = test_db();
        let id = db.register("alice").unwrap();
        let before = db.client(id).unwrap().last_seen;

        std::thread::sleep(std::time::Duration::from_millis(5));
        db.touch_last_seen(id).unwrap();

        assert!(db.client(id).unwrap().last_seen > before);
    }

    #[test]
    fn test_concurrent_registration_distinct_names() {
        let (db, _dir) = test_db();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let db = db.clone();
                std::thread::spawn(move || db.register(&format!("client-{i}")).unwrap())
            })
            .collect();

        let mut ids: Vec<ClientId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
        assert_eq!(db.list_clients().unwrap().len(), 16);
    }

    #[test]
    fn test_concurrent_registration_same_name() {
        let (db, _dir) = test_db();
        let db = Arc::new(db);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.register("contested").is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(db.list_clients().unwrap().len(), 1);
    }
}
