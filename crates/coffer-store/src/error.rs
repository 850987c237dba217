use coffer_shared::ClientId;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Registration with a name that is already taken.
    #[error("Client name already registered: {0}")]
    DuplicateName(String),

    /// No client row with this id.
    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    /// No file row for this `(client, filename)` pair.
    #[error("Unknown file {filename:?} for client {client_id}")]
    UnknownFile { client_id: ClientId, filename: String },

    /// A stored value could not be decoded.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A connection mutex was poisoned by a panicking holder.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
