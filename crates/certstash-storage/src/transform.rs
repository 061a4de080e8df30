//! At-rest payload encryption
//!
//! Payloads are either stored as-is or sealed with XChaCha20-Poly1305.
//! A sealed payload is self-contained:
//!
//! ```text
//! +----------------+------------------------------+
//! | nonce (24 B)   | ciphertext || tag (16 B)     |
//! +----------------+------------------------------+
//! ```
//!
//! A fresh random nonce is drawn for every `wrap`, so no counter state has
//! to be shared between processes writing to the same bucket.

use crate::error::{Result, StorageError};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use tracing::info;

/// Required size of the symmetric key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (192 bits for XChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 24;

/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Converts plaintext to and from its stored representation
#[derive(Clone)]
pub enum EncryptionTransform {
    /// Store payloads unchanged
    Cleartext,
    /// Authenticated symmetric encryption
    Sealed(XChaCha20Poly1305),
}

impl EncryptionTransform {
    /// Build a transform from an optional key
    ///
    /// A missing or empty key selects [`EncryptionTransform::Cleartext`].
    /// Any other key must be exactly [`KEY_SIZE`] bytes.
    pub fn from_key(key: Option<&[u8]>) -> Result<Self> {
        match key {
            None | Some([]) => {
                info!("Clear text certificate storage active");
                Ok(Self::Cleartext)
            }
            Some(bytes) if bytes.len() != KEY_SIZE => Err(StorageError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            }),
            Some(bytes) => {
                let cipher = XChaCha20Poly1305::new_from_slice(bytes).map_err(|_| {
                    StorageError::InvalidKeyLength {
                        expected: KEY_SIZE,
                        actual: bytes.len(),
                    }
                })?;
                info!("Encrypted certificate storage active");
                Ok(Self::Sealed(cipher))
            }
        }
    }

    /// Whether payloads are encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    /// Convert plaintext into its stored form
    pub fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Cleartext => Ok(plaintext.to_vec()),
            Self::Sealed(cipher) => {
                let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, plaintext)
                    .map_err(|_| StorageError::SealFailed)?;

                let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
                out.extend_from_slice(&nonce);
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
        }
    }

    /// Recover plaintext from its stored form
    ///
    /// Fails with [`StorageError::AuthenticationFailed`] when a sealed payload
    /// is truncated or does not verify. No partial plaintext is ever returned.
    pub fn unwrap(&self, stored: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Cleartext => Ok(stored.to_vec()),
            Self::Sealed(cipher) => {
                if stored.len() < NONCE_SIZE + TAG_SIZE {
                    return Err(StorageError::AuthenticationFailed);
                }
                let (nonce, ciphertext) = stored.split_at(NONCE_SIZE);
                cipher
                    .decrypt(XNonce::from_slice(nonce), ciphertext)
                    .map_err(|_| StorageError::AuthenticationFailed)
            }
        }
    }
}

impl std::fmt::Debug for EncryptionTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cleartext => f.write_str("Cleartext"),
            Self::Sealed(_) => f.write_str("Sealed(XChaCha20Poly1305)"),
        }
    }
}
