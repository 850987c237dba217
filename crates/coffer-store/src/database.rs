//! Connection management and the write-serialization discipline.
//!
//! [`Database`] owns exactly one writer connection behind a mutex. Every
//! mutation runs while holding it and is committed before the guard drops,
//! so two sessions can never interleave half-applied writes. Reads check out
//! a read-only connection from a small pool instead; with the WAL journal
//! they run concurrently with each other and with the writer, and only ever
//! observe committed transactions.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Idle read connections kept around for reuse.
const MAX_IDLE_READERS: usize = 8;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl Database {
    /// Open (or create) the registry database at `path`, running any pending
    /// migrations before returning.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening registry database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        })
    }

    /// Filesystem path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` as the only writer. Multi-statement writes should open a
    /// transaction on the connection they are handed.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Run `f` on a pooled read-only connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let pooled = self
            .readers
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?
            .pop();

        let conn = match pooled {
            Some(conn) => conn,
            None => self.open_reader()?,
        };

        let result = f(&conn);

        if let Ok(mut idle) = self.readers.lock() {
            if idle.len() < MAX_IDLE_READERS {
                idle.push(conn);
            }
        }

        result
    }

    fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        tracing::debug!(path = %self.path.display(), "opened registry reader");
        Ok(conn)
    }
}

/// Convert a 16-byte BLOB column into a [`coffer_shared::ClientId`].
pub(crate) fn client_id_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<coffer_shared::ClientId> {
    let raw: Vec<u8> = row.get(idx)?;
    let bytes: [u8; coffer_shared::constants::CLIENT_ID_SIZE] =
        raw.as_slice().try_into().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Blob,
                format!("client id is {} bytes", raw.len()).into(),
            )
        })?;
    Ok(coffer_shared::ClientId::from_bytes(bytes))
}

/// Parse an RFC-3339 TEXT column.
pub(crate) fn timestamp_column(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    chrono::DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        let db = Database::open_at(&path).expect("should open");
        assert_eq!(db.path(), path.as_path());

        let version: u32 = db
            .read(|conn| Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.db");
        Database::open_at(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        let id = Database::open_at(&path).unwrap().register("carol").unwrap();
        let reopened = Database::open_at(&path).unwrap();
        assert!(reopened.exists(id).unwrap());
    }

    #[test]
    fn test_readers_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("registry.db")).unwrap();

        let result = db.read(|conn| {
            conn.execute("DELETE FROM clients", [])?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_reader_pool_reuses_connections() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("registry.db")).unwrap();

        for _ in 0..3 {
            db.read(|_| Ok(())).unwrap();
        }
        assert_eq!(db.readers.lock().unwrap().len(), 1);
    }
}
