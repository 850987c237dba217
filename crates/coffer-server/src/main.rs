//! # coffer-server
//!
//! Encrypted backup server. Clients register under a unique name, receive a
//! fresh AES session key wrapped with their RSA public key, then upload
//! encrypted files. The server decrypts each upload, stores the plaintext,
//! and reports a CRC-32 the client confirms before the backup counts as
//! verified.
//!
//! This binary wires together:
//! - the **registry** (SQLite via `coffer-store`) of clients and files
//! - the **blob store** holding decrypted file contents on disk
//! - the **listener**, one supervised session task per TCP connection

mod blob_store;
mod config;
mod error;
mod listener;
mod session;

use std::sync::Arc;

use coffer_shared::crypto::RsaAesProvider;
use coffer_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::listener::Listener;
use crate::session::{SessionContext, SessionLimits};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coffer_server=debug")),
        )
        .init();

    info!("Starting Coffer backup server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database_path = config.database_path.clone();
    let registry = Arc::new(
        tokio::task::spawn_blocking(move || Database::open_at(&database_path)).await??,
    );

    // Blob store (creates directory if missing)
    let blobs = Arc::new(BlobStore::new(config.storage_dir.clone(), config.max_file_size).await?);

    let ctx = SessionContext {
        registry,
        crypto: Arc::new(RsaAesProvider),
        blobs,
        limits: SessionLimits {
            read_timeout: config.read_timeout,
            max_upload_attempts: config.max_upload_attempts,
            max_content_size: config.max_content_size(),
        },
    };

    // -----------------------------------------------------------------------
    // 4. Serve until Ctrl+C
    // -----------------------------------------------------------------------
    let listener = Listener::bind(config.listen_addr(), ctx).await?;
    info!(addr = %listener.local_addr()?, "Listening for backup clients");

    listener
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}
