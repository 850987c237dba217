use chrono::Utc;
use coffer_shared::{BlobHandle, ClientId};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::{client_id_column, timestamp_column, Database};
use crate::error::{Result, StoreError};
use crate::models::FileRecord;

impl Database {
    /// Record an unverified upload. A previous row for the same
    /// `(client, filename)` is replaced and its blob handle returned so the
    /// caller can drop the stale content.
    pub fn add_file(
        &self,
        id: ClientId,
        filename: &str,
        handle: BlobHandle,
        content_size: u64,
        checksum: u32,
    ) -> Result<Option<BlobHandle>> {
        self.write(|conn| {
            let tx = conn.transaction()?;

            let known: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM clients WHERE id = ?1)",
                params![&id.as_bytes()[..]],
                |row| row.get(0),
            )?;
            if !known {
                return Err(StoreError::UnknownClient(id));
            }

            let previous: Option<String> = tx
                .query_row(
                    "SELECT storage_handle FROM files WHERE client_id = ?1 AND filename = ?2",
                    params![&id.as_bytes()[..], filename],
                    |row| row.get(0),
                )
                .optional()?;

            tx.execute(
                "INSERT INTO files (client_id, filename, storage_handle, content_size, checksum, verified, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
                 ON CONFLICT (client_id, filename) DO UPDATE SET
                     storage_handle = excluded.storage_handle,
                     content_size   = excluded.content_size,
                     checksum       = excluded.checksum,
                     verified       = 0,
                     created_at     = excluded.created_at",
                params![
                    &id.as_bytes()[..],
                    filename,
                    handle.to_string(),
                    content_size as i64,
                    checksum as i64,
                    Utc::now().to_rfc3339(),
                ],
            )?;

            tx.commit()?;

            previous
                .map(|raw| {
                    Uuid::parse_str(&raw)
                        .map(BlobHandle)
                        .map_err(|e| StoreError::Corrupt(format!("storage handle {raw:?}: {e}")))
                })
                .transpose()
        })
    }

    pub fn remove_file(&self, id: ClientId, filename: &str) -> Result<()> {
        self.write(|conn| {
            let affected = conn.execute(
                "DELETE FROM files WHERE client_id = ?1 AND filename = ?2",
                params![&id.as_bytes()[..], filename],
            )?;
            if affected == 0 {
                return Err(unknown_file(id, filename));
            }
            Ok(())
        })
    }

    pub fn mark_verified(&self, id: ClientId, filename: &str) -> Result<()> {
        self.write(|conn| {
            let affected = conn.execute(
                "UPDATE files SET verified = 1 WHERE client_id = ?1 AND filename = ?2",
                params![&id.as_bytes()[..], filename],
            )?;
            if affected == 0 {
                return Err(unknown_file(id, filename));
            }
            Ok(())
        })
    }

    pub fn file_handle(&self, id: ClientId, filename: &str) -> Result<BlobHandle> {
        Ok(self.file(id, filename)?.storage_handle)
    }

    pub fn file(&self, id: ClientId, filename: &str) -> Result<FileRecord> {
        self.read(|conn| {
            conn.query_row(
                "SELECT client_id, filename, storage_handle, content_size, checksum, verified, created_at
                 FROM files
                 WHERE client_id = ?1 AND filename = ?2",
                params![&id.as_bytes()[..], filename],
                row_to_file,
            )
            .optional()?
            .ok_or_else(|| unknown_file(id, filename))
        })
    }

    pub fn files_for(&self, id: ClientId) -> Result<Vec<FileRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT client_id, filename, storage_handle, content_size, checksum, verified, created_at
                 FROM files
                 WHERE client_id = ?1
                 ORDER BY filename ASC",
            )?;
            let rows = stmt.query_map(params![&id.as_bytes()[..]], row_to_file)?;

            let mut files = Vec::new();
            for row in rows {
                files.push(row?);
            }
            Ok(files)
        })
    }
}

fn unknown_file(id: ClientId, filename: &str) -> StoreError {
    StoreError::UnknownFile {
        client_id: id,
        filename: filename.to_string(),
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let handle_str: String = row.get(2)?;
    let content_size: i64 = row.get(3)?;
    let checksum: i64 = row.get(4)?;
    let verified_int: i32 = row.get(5)?;

    let storage_handle = Uuid::parse_str(&handle_str).map(BlobHandle).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FileRecord {
        client_id: client_id_column(row, 0)?,
        filename: row.get(1)?,
        storage_handle,
        content_size: content_size as u64,
        checksum: checksum as u32,
        verified: verified_int != 0,
        created_at: timestamp_column(row, 6)?,
    })
}
