//! Cryptographic primitives for the packing core
//!
//! AES-256-GCM sealing of byte blobs and a zeroizing wrapper for key
//! material. Sealed blobs carry the nonce as a prefix: `nonce ‖ ciphertext`.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PackError, Result};

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Key material that zeroizes its memory on drop.
///
/// Used for both long-lived master keys and the per-pack data encryption
/// keys; neither may outlive its owner in readable memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    /// Wrap existing raw key bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Draw a fresh random AES-256 key from the system CSPRNG
    pub fn generate() -> Self {
        let mut key = vec![0u8; AES_256_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { bytes: key }
    }

    /// Raw key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the key holds no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// AES-256-GCM cipher over self-contained blobs
pub struct AesGcmCipher;

impl AesGcmCipher {
    /// Encrypt `plaintext`, returning `nonce ‖ ciphertext+tag`.
    ///
    /// The nonce is drawn fresh from the system CSPRNG for every call.
    pub fn seal(key: &SecretKey, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| PackError::Internal(format!("cipher init: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| PackError::Internal(format!("encryption: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob produced by [`AesGcmCipher::seal`].
    ///
    /// Truncation, tampering and a wrong key all surface as the same
    /// [`PackError::Decrypt`].
    pub fn open(key: &SecretKey, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_SIZE + TAG_SIZE {
            return Err(PackError::Decrypt);
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| PackError::Decrypt)?;

        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| PackError::Decrypt)
    }
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a readable random string over `A-Z a-z 0-9` from the system
/// CSPRNG. Used for row names and table-key segments.
pub(crate) fn random_alphanumeric(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;

    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
