/// Version byte stamped on every server response
pub const SERVER_VERSION: u8 = 3;

/// Client identifier size in bytes (UUID)
pub const CLIENT_ID_SIZE: usize = 16;

/// Zero-padded name / filename field width
pub const NAME_SIZE: usize = 255;

/// Zero-padded DER public key field width
pub const PUBLIC_KEY_SIZE: usize = 160;

/// AES-128 session key size in bytes
pub const SESSION_KEY_SIZE: usize = 16;

/// Client header: client_id(16) + version(1) + code(2) + payload_size(4)
pub const CLIENT_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;

/// Server header: version(1) + code(2) + payload_size(4)
pub const SERVER_HEADER_SIZE: usize = 1 + 2 + 4;

/// Default cap on encrypted upload content (64 MiB); servers may configure another
pub const MAX_CONTENT_SIZE: usize = 64 * 1024 * 1024;

/// AES block size; PKCS#7 grows ciphertext by at most one block
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Largest encrypted session key accepted in an AES key response
pub const MAX_ENCRYPTED_KEY_SIZE: usize = 1024;

/// Port used when no configuration source provides one
pub const DEFAULT_PORT: u16 = 1234;
