use coffer_shared::{BlobHandle, ClientId};

use crate::database::Database;
use crate::error::Result;

/// The registry operations a backup session depends on.
///
/// Implementations must serialize every mutating call behind a single writer
/// and let readers observe only committed state. Sessions hold the registry
/// as `Arc<dyn ClientRegistry>`.
pub trait ClientRegistry: Send + Sync {
    fn register(&self, name: &str) -> Result<ClientId>;

    fn set_keys(&self, id: ClientId, public_key: &[u8], session_key: &[u8]) -> Result<()>;

    fn get_session_key(&self, id: ClientId) -> Result<Vec<u8>>;

    fn exists(&self, id: ClientId) -> Result<bool>;

    fn touch_last_seen(&self, id: ClientId) -> Result<()>;

    /// Returns the handle of a replaced upload with the same filename, if any.
    fn add_file(
        &self,
        id: ClientId,
        filename: &str,
        handle: BlobHandle,
        content_size: u64,
        checksum: u32,
    ) -> Result<Option<BlobHandle>>;

    fn remove_file(&self, id: ClientId, filename: &str) -> Result<()>;

    fn mark_verified(&self, id: ClientId, filename: &str) -> Result<()>;

    fn file_handle(&self, id: ClientId, filename: &str) -> Result<BlobHandle>;
}

impl ClientRegistry for Database {
    fn register(&self, name: &str) -> Result<ClientId> {
        Database::register(self, name)
    }

    fn set_keys(&self, id: ClientId, public_key: &[u8], session_key: &[u8]) -> Result<()> {
        Database::set_keys(self, id, public_key, session_key)
    }

    fn get_session_key(&self, id: ClientId) -> Result<Vec<u8>> {
        Database::get_session_key(self, id)
    }

    fn exists(&self, id: ClientId) -> Result<bool> {
        Database::exists(self, id)
    }

    fn touch_last_seen(&self, id: ClientId) -> Result<()> {
        Database::touch_last_seen(self, id)
    }

    fn add_file(
        &self,
        id: ClientId,
        filename: &str,
        handle: BlobHandle,
        content_size: u64,
        checksum: u32,
    ) -> Result<Option<BlobHandle>> {
        Database::add_file(self, id, filename, handle, content_size, checksum)
    }

    fn remove_file(&self, id: ClientId, filename: &str) -> Result<()> {
        Database::remove_file(self, id, filename)
    }

    fn mark_verified(&self, id: ClientId, filename: &str) -> Result<()> {
        Database::mark_verified(self, id, filename)
    }

    fn file_handle(&self, id: ClientId, filename: &str) -> Result<BlobHandle> {
        Database::file_handle(self, id, filename)
    }
}
