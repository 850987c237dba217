//! One client connection, from first message to close.
//!
//! ```text
//! AwaitingInitial --Registration--> Registering --ok--> AwaitingPublicKey
//!        \                                  \--taken--> RegistrationFailed, Closed
//!         \--PublicKey (known client)-------------------------> key exchange
//! key exchange --AesKey--> AwaitingUpload --UploadFileSuccessful--> AwaitingChecksumVerdict
//! AwaitingChecksumVerdict --FileCrcOk-----> SuccessResponse, Closed
//!                         --FileCrcRetry--> AwaitingUpload (same filename)
//!                         --FileCrcGiveUp-> Closed
//! ```
//!
//! Every state step returns a `Result`; any error ends the session and the
//! stream is shut down whichever way it ends. Only a taken name gets a
//! response before the close.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use coffer_shared::checksum::checksum;
use coffer_shared::constants::{SERVER_VERSION, SESSION_KEY_SIZE};
use coffer_shared::crypto::CryptoProvider;
use coffer_shared::protocol::{
    read_client_message, write_server_message, ClientCode, ClientMessage, ClientPayload,
    ServerMessage, ServerPayload,
};
use coffer_shared::ClientId;
use coffer_store::ClientRegistry;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::blob_store::BlobStore;
use crate::error::{BlobError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInitial,
    Registering,
    AwaitingPublicKey,
    AwaitingUpload,
    AwaitingChecksumVerdict,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingInitial => "awaiting-initial",
            Self::Registering => "registering",
            Self::AwaitingPublicKey => "awaiting-public-key",
            Self::AwaitingUpload => "awaiting-upload",
            Self::AwaitingChecksumVerdict => "awaiting-checksum-verdict",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// How a session that followed the protocol to the end finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Verified { client_id: ClientId, filename: String },
    GaveUp { client_id: ClientId, filename: String },
}

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub read_timeout: Duration,
    pub max_upload_attempts: u32,
    /// Largest encrypted upload the decoder will accept.
    pub max_content_size: usize,
}

/// Shared services handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<dyn ClientRegistry>,
    pub crypto: Arc<dyn CryptoProvider>,
    pub blobs: Arc<BlobStore>,
    pub limits: SessionLimits,
}

impl SessionContext {
    /// Run a registry call on the blocking pool.
    async fn registry<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ClientRegistry) -> coffer_store::Result<T> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        Ok(tokio::task::spawn_blocking(move || f(registry.as_ref())).await??)
    }

    async fn touch(&self, client_id: ClientId) -> Result<(), SessionError> {
        self.registry(move |r| r.touch_last_seen(client_id)).await
    }
}

enum Verdict {
    Confirmed,
    Retry,
    GiveUp,
}

pub struct Session<S> {
    stream: S,
    ctx: SessionContext,
    peer: String,
    state: SessionState,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, ctx: SessionContext, peer: impl Into<String>) -> Self {
        Self {
            stream,
            ctx,
            peer: peer.into(),
            state: SessionState::AwaitingInitial,
        }
    }

    pub async fn run(mut self) -> Result<SessionOutcome, SessionError> {
        let result = self.drive().await;
        self.state = SessionState::Closed;

        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Stream shutdown failed");
        }
        result
    }

    async fn drive(&mut self) -> Result<SessionOutcome, SessionError> {
        let first = self.receive().await?;

        let key_request = match first.header.code {
            ClientCode::Registration => {
                let registered = self.register(first).await?;
                self.state = SessionState::AwaitingPublicKey;
                let key_request = self.receive().await?;
                self.ensure_client(registered, &key_request)?;
                key_request
            }
            _ => first,
        };

        let client_id = self.exchange_keys(key_request).await?;

        let mut attempts = 0u32;
        let mut retrying: Option<String> = None;
        loop {
            self.state = SessionState::AwaitingUpload;
            let upload = self.receive().await?;
            attempts += 1;
            let filename = self
                .accept_upload(client_id, upload, retrying.as_deref())
                .await?;

            self.state = SessionState::AwaitingChecksumVerdict;
            let verdict = self.receive().await?;
            match self.settle(client_id, &filename, verdict).await? {
                Verdict::Confirmed => {
                    return Ok(SessionOutcome::Verified {
                        client_id,
                        filename,
                    })
                }
                Verdict::GiveUp => {
                    return Ok(SessionOutcome::GaveUp {
                        client_id,
                        filename,
                    })
                }
                Verdict::Retry if attempts >= self.ctx.limits.max_upload_attempts => {
                    return Err(SessionError::TooManyRetries(attempts));
                }
                Verdict::Retry => retrying = Some(filename),
            }
        }
    }

    async fn receive(&mut self) -> Result<ClientMessage, SessionError> {
        let state = self.state;
        let message = tokio::time::timeout(
            self.ctx.limits.read_timeout,
            read_client_message(&mut self.stream, self.ctx.limits.max_content_size),
        )
        .await
        .map_err(|_| SessionError::ConnectionTimedOut(state))??;

        debug!(
            peer = %self.peer,
            state = %state,
            code = ?message.header.code,
            version = message.header.version,
            payload_size = message.header.payload_size,
            "Received message"
        );
        Ok(message)
    }

    async fn send(&mut self, payload: ServerPayload) -> Result<(), SessionError> {
        let message = ServerMessage::new(SERVER_VERSION, payload);
        debug!(peer = %self.peer, code = ?message.code(), "Sending response");
        write_server_message(&mut self.stream, &message).await?;
        Ok(())
    }

    fn wrong_message(&self, received: ClientCode) -> SessionError {
        SessionError::WrongMessageReceived {
            state: self.state,
            received,
        }
    }

    fn ensure_client(&self, expected: ClientId, message: &ClientMessage) -> Result<(), SessionError> {
        if message.header.client_id != expected {
            return Err(SessionError::ClientMismatch {
                expected,
                received: message.header.client_id,
            });
        }
        Ok(())
    }

    async fn register(&mut self, message: ClientMessage) -> Result<ClientId, SessionError> {
        self.state = SessionState::Registering;
        let ClientPayload::Registration { name } = message.payload else {
            return Err(self.wrong_message(message.header.code));
        };

        let requested = name.clone();
        match self.ctx.registry(move |r| r.register(&requested)).await {
            Ok(client_id) => {
                info!(peer = %self.peer, client = %client_id, name = %name, "Client registered");
                self.send(ServerPayload::RegistrationSuccessful { client_id })
                    .await?;
                Ok(client_id)
            }
            Err(e @ SessionError::FailedToRegisterClient(_)) => {
                info!(peer = %self.peer, name = %name, "Registration rejected, name taken");
                self.send(ServerPayload::RegistrationFailed).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn exchange_keys(&mut self, message: ClientMessage) -> Result<ClientId, SessionError> {
        self.state = SessionState::AwaitingPublicKey;
        let client_id = message.header.client_id;
        let ClientPayload::PublicKey { name, public_key } = message.payload else {
            return Err(self.wrong_message(message.header.code));
        };

        if !self.ctx.registry(move |r| r.exists(client_id)).await? {
            return Err(SessionError::UnknownClient(client_id));
        }
        self.ctx.touch(client_id).await?;

        let session_key = self.ctx.crypto.generate_session_key(SESSION_KEY_SIZE)?;
        {
            let session_key = session_key.clone();
            self.ctx
                .registry(move |r| r.set_keys(client_id, &public_key, &session_key))
                .await?;
        }
        let encrypted_key = self
            .ctx
            .crypto
            .encrypt_with_public_key(&session_key, &public_key)?;

        info!(peer = %self.peer, client = %client_id, name = %name, "Issued session key");
        self.send(ServerPayload::AesKey {
            client_id,
            encrypted_key,
        })
        .await?;
        Ok(client_id)
    }

    /// Decrypt, checksum and durably store one upload. Returns its filename.
    async fn accept_upload(
        &mut self,
        client_id: ClientId,
        message: ClientMessage,
        retrying: Option<&str>,
    ) -> Result<String, SessionError> {
        self.ensure_client(client_id, &message)?;
        let ClientPayload::UploadFile {
            filename, content, ..
        } = message.payload
        else {
            return Err(self.wrong_message(message.header.code));
        };
        if let Some(expected) = retrying {
            if filename != expected {
                return Err(SessionError::UnexpectedFile {
                    expected: expected.to_string(),
                    received: filename,
                });
            }
        }
        self.ctx.touch(client_id).await?;

        let key = self
            .ctx
            .registry(move |r| r.get_session_key(client_id))
            .await?;
        let plain = self.ctx.crypto.decrypt_with_session_key(&content, &key)?;
        let crc = checksum(&plain);
        let content_size = plain.len();

        let handle = self.ctx.blobs.put(&plain).await?;
        let recorded = {
            let filename = filename.clone();
            self.ctx
                .registry(move |r| {
                    r.add_file(client_id, &filename, handle, content_size as u64, crc)
                })
                .await
        };
        let replaced = match recorded {
            Ok(replaced) => replaced,
            Err(e) => {
                if let Err(cleanup) = self.ctx.blobs.delete(handle).await {
                    warn!(handle = %handle, error = %cleanup, "Failed to drop unrecorded blob");
                }
                return Err(e);
            }
        };
        if let Some(old) = replaced {
            if let Err(e) = self.ctx.blobs.delete(old).await {
                warn!(handle = %old, error = %e, "Failed to drop replaced blob");
            }
        }

        info!(
            peer = %self.peer,
            client = %client_id,
            filename = %filename,
            size = content_size,
            checksum = crc,
            "Stored upload"
        );
        self.send(ServerPayload::UploadFileSuccessful {
            client_id,
            // bounded by the blob store's max size, which fits the wire's u32
            content_size: content_size as u32,
            filename: filename.clone(),
            checksum: crc,
        })
        .await?;
        Ok(filename)
    }

    async fn settle(
        &mut self,
        client_id: ClientId,
        filename: &str,
        message: ClientMessage,
    ) -> Result<Verdict, SessionError> {
        self.ensure_client(client_id, &message)?;
        let (verdict, named) = match message.payload {
            ClientPayload::FileCrcOk { filename, .. } => (Verdict::Confirmed, filename),
            ClientPayload::FileCrcRetry { filename, .. } => (Verdict::Retry, filename),
            ClientPayload::FileCrcGiveUp { filename, .. } => (Verdict::GiveUp, filename),
            other => return Err(self.wrong_message(other.code())),
        };
        if named != filename {
            return Err(SessionError::UnexpectedFile {
                expected: filename.to_string(),
                received: named,
            });
        }
        self.ctx.touch(client_id).await?;

        match verdict {
            Verdict::Confirmed => {
                let filename = filename.to_string();
                self.ctx
                    .registry(move |r| r.mark_verified(client_id, &filename))
                    .await?;
                info!(peer = %self.peer, client = %client_id, filename = %named, "Backup verified");
                self.send(ServerPayload::SuccessResponse).await?;
            }
            Verdict::Retry => {
                self.discard(client_id, filename).await?;
                info!(peer = %self.peer, client = %client_id, filename = %named, "Client will retry");
            }
            Verdict::GiveUp => {
                self.discard(client_id, filename).await?;
                info!(peer = %self.peer, client = %client_id, filename = %named, "Client gave up");
            }
        }
        Ok(verdict)
    }

    /// Remove an unverified upload: its record and its blob.
    async fn discard(&self, client_id: ClientId, filename: &str) -> Result<(), SessionError> {
        let handle = {
            let filename = filename.to_string();
            self.ctx
                .registry(move |r| {
                    let handle = r.file_handle(client_id, &filename)?;
                    r.remove_file(client_id, &filename)?;
                    Ok(handle)
                })
                .await?
        };

        match self.ctx.blobs.delete(handle).await {
            Ok(()) => Ok(()),
            Err(BlobError::NotFound(_)) => {
                warn!(handle = %handle, "Discarded upload had no blob");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
