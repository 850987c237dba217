//! # coffer-store
//!
//! Persistent client registry for the backup server, backed by SQLite.
//!
//! One row per registered client (name, public key, current session key,
//! last-seen time) and one row per backed-up `(client, filename)` pair.
//! The [`Database`] handle is shared by every session: writes go through a
//! single writer connection one at a time, reads use a small pool of
//! read-only connections and only ever see committed rows.

pub mod clients;
pub mod database;
pub mod files;
pub mod migrations;
pub mod models;
pub mod registry;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use registry::ClientRegistry;
