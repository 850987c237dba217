//! Rows persisted in the registry database.

use chrono::{DateTime, Utc};
use coffer_shared::{BlobHandle, ClientId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// A registered backup client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRecord {
    /// Server-generated id, never reused.
    pub id: ClientId,
    /// Unique across all clients.
    pub name: String,
    /// Wire-format public key; empty until the first key exchange.
    pub public_key: Vec<u8>,
    /// Symmetric key issued at the most recent key exchange; empty before.
    pub session_key: Vec<u8>,
    /// Time the server last received a message from this client.
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// One backed-up file. `(client_id, filename)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub client_id: ClientId,
    pub filename: String,
    /// Where the decrypted content lives in the blob store.
    pub storage_handle: BlobHandle,
    /// Plaintext size in bytes.
    pub content_size: u64,
    /// CRC reported to the client after decryption.
    pub checksum: u32,
    /// Set once the client confirms the checksum.
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}
