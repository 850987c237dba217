use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::pkcs1::der::{Decode, Header, Reader, SliceReader, Tag};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

// Clients encrypt uploads with a fixed all-zero IV
const ZERO_IV: [u8; 16] = [0u8; 16];

/// Key material operations the session handler needs.
///
/// Kept as a trait so sessions can run against deterministic fakes in tests.
pub trait CryptoProvider: Send + Sync {
    /// Fresh random symmetric key of `size` bytes.
    fn generate_session_key(&self, size: usize) -> Result<Vec<u8>, CryptoError>;

    /// Encrypt `plain` for the holder of `public_key` (wire-format key bytes).
    fn encrypt_with_public_key(&self, plain: &[u8], public_key: &[u8])
        -> Result<Vec<u8>, CryptoError>;

    /// Decrypt uploaded content with a previously issued session key.
    fn decrypt_with_session_key(&self, cipher: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// RSA-OAEP(SHA-1) for the key exchange, AES-128-CBC/PKCS#7 for content.
#[derive(Debug, Clone, Copy, Default)]
pub struct RsaAesProvider;

impl CryptoProvider for RsaAesProvider {
    fn generate_session_key(&self, size: usize) -> Result<Vec<u8>, CryptoError> {
        if size == 0 {
            return Err(CryptoError::InvalidKeyLength);
        }
        let mut key = vec![0u8; size];
        rand::rngs::OsRng.fill_bytes(&mut key);
        Ok(key)
    }

    fn encrypt_with_public_key(
        &self,
        plain: &[u8],
        public_key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let key = parse_public_key(public_key)?;
        key.encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha1>(), plain)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn decrypt_with_session_key(&self, cipher: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let decryptor = Aes128CbcDec::new_from_slices(key, &ZERO_IV)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(cipher)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// Client-side counterpart of [`CryptoProvider::decrypt_with_session_key`].
pub fn encrypt_with_session_key(plain: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let encryptor =
        Aes128CbcEnc::new_from_slices(key, &ZERO_IV).map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plain))
}

/// Parse a zero-padded DER public key: X.509 SubjectPublicKeyInfo first,
/// bare PKCS#1 `RSAPublicKey` as a fallback.
pub fn parse_public_key(raw: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    let der = der_prefix(raw)
        .ok_or_else(|| CryptoError::InvalidPublicKey("not a DER sequence".to_string()))?;

    RsaPublicKey::from_public_key_der(der)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(der))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

// The wire field is fixed width; trim the padding using the outer SEQUENCE length.
fn der_prefix(raw: &[u8]) -> Option<&[u8]> {
    let mut reader = SliceReader::new(raw).ok()?;
    let header = Header::decode(&mut reader).ok()?;
    if header.tag != Tag::Sequence {
        return None;
    }

    let total = (reader.position() + header.length).ok()?;
    raw.get(..usize::try_from(total).ok()?)
}
