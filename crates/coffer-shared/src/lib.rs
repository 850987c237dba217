//! # coffer-shared
//!
//! Types shared by every Coffer crate: the binary wire protocol spoken
//! between backup clients and the server, the CRC-32 checksum both sides
//! compute over plaintext, and the crypto capability used for the session
//! key handshake.

pub mod checksum;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, ProtocolError};
pub use types::{BlobHandle, ClientId};
