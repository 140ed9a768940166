//! AES-256-GCM segment framing over a [`CryptoService`]
//!
//! Wire form of every sealed blob: `IV (12) || ciphertext || tag (16)`.

use std::sync::Arc;

use crate::backend::{Algorithm, CryptoService, AUTH_TAG_LENGTH};
use crate::helpers::CryptoError;
use crate::types::{KeyInfo, Nonce96, PayloadKey};

pub const IV_LENGTH: usize = 12;
/// Bytes added to each segment by IV and tag
pub const SEGMENT_OVERHEAD: usize = IV_LENGTH + AUTH_TAG_LENGTH;

#[derive(Debug, Clone)]
pub struct AesGcmCipher {
    crypto: Arc<dyn CryptoService>,
}

impl AesGcmCipher {
    pub fn new(crypto: Arc<dyn CryptoService>) -> Self {
        AesGcmCipher { crypto }
    }

    pub fn algorithm(&self) -> Algorithm {
        Algorithm::Aes256Gcm
    }

    /// Fresh random data key
    pub fn generate_key(&self) -> Result<PayloadKey, CryptoError> {
        let bytes = zeroize::Zeroizing::new(self.crypto.random_bytes(PayloadKey::LENGTH));
        PayloadKey::from_slice(&bytes).map_err(|_| CryptoError::OperationFailed {
            operation: "key generation",
        })
    }

    /// Fresh random IV
    pub fn generate_iv(&self) -> Result<Nonce96, CryptoError> {
        let bytes = self.crypto.random_bytes(IV_LENGTH);
        Nonce96::from_slice(&bytes).map_err(|_| CryptoError::OperationFailed {
            operation: "IV generation",
        })
    }

    /// Data key plus the IV that goes into `method.iv`
    pub fn generate_key_info(&self) -> Result<KeyInfo, CryptoError> {
        Ok(KeyInfo {
            key: self.generate_key()?,
            iv: self.generate_iv()?,
        })
    }

    /// Seal `payload` under `key`
    ///
    /// Segments always get a fresh IV; `iv` is only supplied for key-access
    /// metadata, where the manifest records the IV.
    pub fn encrypt(
        &self,
        payload: &[u8],
        key: &[u8],
        iv: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError> {
        let fresh;
        let iv = match iv {
            Some(iv) => iv,
            None => {
                fresh = self.generate_iv()?;
                fresh.as_slice()
            }
        };
        let sealed = self.crypto.encrypt(payload, key, iv, self.algorithm())?;
        let tag = sealed.auth_tag.unwrap_or_default();

        let mut out = Vec::with_capacity(iv.len() + sealed.payload.len() + tag.len());
        out.extend_from_slice(iv);
        out.extend_from_slice(&sealed.payload);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Open an `IV || ciphertext || tag` blob
    pub fn decrypt(&self, blob: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < SEGMENT_OVERHEAD {
            return Err(CryptoError::CiphertextTooShort {
                len: blob.len(),
                min: SEGMENT_OVERHEAD,
            });
        }
        let (iv, rest) = blob.split_at(IV_LENGTH);
        let (ciphertext, tag) = rest.split_at(rest.len() - AUTH_TAG_LENGTH);
        self.crypto
            .decrypt(ciphertext, key, iv, self.algorithm(), Some(tag))
    }
}
