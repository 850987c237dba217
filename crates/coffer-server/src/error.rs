use coffer_shared::protocol::ClientCode;
use coffer_shared::{BlobHandle, ClientId, CryptoError, ProtocolError};
use coffer_store::StoreError;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(BlobHandle),

    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Blob storage error: {0}")]
    Storage(String),
}

/// Every way a backup session can end other than a clean outcome.
///
/// All of them close the connection; only `FailedToRegisterClient` is
/// preceded by a response to the client.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] ProtocolError),

    #[error("Wrong message received in state {state}: {received:?}")]
    WrongMessageReceived {
        state: SessionState,
        received: ClientCode,
    },

    #[error("Failed to register client: name {0:?} already taken")]
    FailedToRegisterClient(String),

    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("Message for client {received} on a session authenticated as {expected}")]
    ClientMismatch {
        expected: ClientId,
        received: ClientId,
    },

    #[error("Expected file {expected:?}, got {received:?}")]
    UnexpectedFile { expected: String, received: String },

    #[error("Timed out waiting for a message in state {0}")]
    ConnectionTimedOut(SessionState),

    #[error("Gave up after {0} upload attempts")]
    TooManyRetries(u32),

    #[error("Registry error: {0}")]
    Registry(StoreError),

    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Registry task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => SessionError::FailedToRegisterClient(name),
            StoreError::UnknownClient(id) => SessionError::UnknownClient(id),
            other => SessionError::Registry(other),
        }
    }
}

impl SessionError {
    /// Expected business outcomes, as opposed to protocol violations or faults.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SessionError::FailedToRegisterClient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_session_conditions() {
        let id = ClientId::new();
        assert!(matches!(
            SessionError::from(StoreError::DuplicateName("alice".into())),
            SessionError::FailedToRegisterClient(ref n) if n == "alice"
        ));
        assert!(matches!(
            SessionError::from(StoreError::UnknownClient(id)),
            SessionError::UnknownClient(got) if got == id
        ));
        assert!(matches!(
            SessionError::from(StoreError::LockPoisoned),
            SessionError::Registry(_)
        ));
    }

    #[test]
    fn test_only_duplicate_name_is_a_rejection() {
        assert!(SessionError::FailedToRegisterClient("a".into()).is_rejection());
        assert!(!SessionError::UnknownClient(ClientId::new()).is_rejection());
    }
}
