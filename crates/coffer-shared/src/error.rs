use thiserror::Error;

/// Failures while framing or parsing wire messages.
///
/// Every variant means the byte stream can no longer be trusted; callers
/// treat all of them as fatal to the connection.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Unknown message code: {0}")]
    UnknownCode(u16),

    #[error("Stream ended before a complete message was read")]
    Truncated,

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Field {field} is {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
}
