//! v001 -- Initial schema: `clients` and `files`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Clients
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS clients (
    id          BLOB PRIMARY KEY NOT NULL,    -- 16 raw UUID bytes
    name        TEXT NOT NULL UNIQUE,
    public_key  BLOB NOT NULL DEFAULT x'',
    session_key BLOB NOT NULL DEFAULT x'',
    last_seen   TEXT NOT NULL                 -- RFC-3339
);

-- ----------------------------------------------------------------
-- Files
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    client_id      BLOB NOT NULL,             -- FK -> clients(id)
    filename       TEXT NOT NULL,
    storage_handle TEXT NOT NULL,             -- blob store UUID
    content_size   INTEGER NOT NULL,
    checksum       INTEGER NOT NULL,
    verified       INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    created_at     TEXT NOT NULL,

    PRIMARY KEY (client_id, filename),
    FOREIGN KEY (client_id) REFERENCES clients(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
