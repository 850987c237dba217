//! Plaintext backup content on the local filesystem.
//!
//! Each blob is a file named after its [`BlobHandle`] directly under the
//! store's base directory. Writes go to a `.part` file that is synced and
//! then renamed into place, and the directory is synced after the rename,
//! so a handle is only ever returned for content that survives a crash.

use std::path::PathBuf;

use coffer_shared::BlobHandle;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::BlobError;

const PARTIAL_SUFFIX: &str = "part";

#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl BlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, BlobError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            BlobError::Storage(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), max_size, "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    /// Durably store `data` under a fresh handle. Empty content is a valid
    /// backup of an empty file.
    pub async fn put(&self, data: &[u8]) -> Result<BlobHandle, BlobError> {
        if data.len() > self.max_size {
            return Err(BlobError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let handle = BlobHandle::new();
        let final_path = self.blob_path(handle);
        let partial_path = final_path.with_extension(PARTIAL_SUFFIX);

        let write = async {
            let mut file = fs::File::create(&partial_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&partial_path, &final_path).await?;
            // the rename lives in the directory entry
            #[cfg(unix)]
            fs::File::open(&self.base_path).await?.sync_all().await?;
            Ok::<_, std::io::Error>(())
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&partial_path).await;
            let _ = fs::remove_file(&final_path).await;
            return Err(BlobError::Storage(format!(
                "Failed to write blob {}: {}",
                handle, e
            )));
        }

        debug!(handle = %handle, size = data.len(), "Stored blob");
        Ok(handle)
    }

    pub async fn delete(&self, handle: BlobHandle) -> Result<(), BlobError> {
        match fs::remove_file(self.blob_path(handle)).await {
            Ok(()) => {
                debug!(handle = %handle, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(handle))
            }
            Err(e) => Err(BlobError::Storage(format!(
                "Failed to delete blob {}: {}",
                handle, e
            ))),
        }
    }

    // Handles are UUIDs, so the joined path can never leave `base_path`.
    fn blob_path(&self, handle: BlobHandle) -> PathBuf {
        self.base_path.join(handle.to_string())
    }
}

/// Read access is only needed to check what sessions left behind.
#[cfg(test)]
impl BlobStore {
    pub async fn get(&self, handle: BlobHandle) -> Result<Vec<u8>, BlobError> {
        match fs::read(self.blob_path(handle)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(handle)),
            Err(e) => Err(BlobError::Storage(format!("Failed to read blob {handle}: {e}"))),
        }
    }

    /// Complete blobs only; `.part` leftovers are skipped.
    pub async fn list(&self) -> Result<Vec<BlobHandle>, BlobError> {
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| BlobError::Storage(format!("Failed to list blobs: {e}")))?;

        let mut handles = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BlobError::Storage(format!("Failed to list blobs: {e}")))?
        {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| uuid::Uuid::parse_str(n).ok()) {
                handles.push(BlobHandle(id));
            }
        }
        Ok(handles)
    }
}
