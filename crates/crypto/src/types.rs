//! Zeroizing cryptographic key types
//!
//! This module provides secure wrappers for cryptographic key material that
//! automatically clear memory on drop to prevent key leakage.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 data key (32 bytes) that zeroizes on drop
///
/// One payload key protects every segment of an artifact. It is never
/// persisted; only wrapped or split forms leave memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PayloadKey(pub(crate) [u8; 32]);

impl PayloadKey {
    pub const LENGTH: usize = 32;

    /// Create a new payload key from a 32-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != Self::LENGTH {
            return Err(KeyError::InvalidLength {
                expected: Self::LENGTH,
                got: bytes.len(),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        Ok(PayloadKey(key))
    }

    /// Get a reference to the key bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PayloadKey([REDACTED])")
    }
}

/// 96-bit nonce (12 bytes) that zeroizes on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop, Default)]
pub struct Nonce96(pub(crate) [u8; 12]);

impl Nonce96 {
    pub const LENGTH: usize = 12;

    /// Create a new nonce from a 12-byte slice
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != Self::LENGTH {
            return Err(KeyError::InvalidLength {
                expected: Self::LENGTH,
                got: bytes.len(),
            });
        }
        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(bytes);
        Ok(Nonce96(nonce))
    }

    /// Get a reference to the nonce bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Get a mutable reference to the nonce bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// A data key together with the IV used for key-access metadata
#[derive(Clone, Debug)]
pub struct KeyInfo {
    pub key: PayloadKey,
    pub iv: Nonce96,
}

impl std::fmt::Debug for Nonce96 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce96({})", hex::encode(self.0))
    }
}

/// Key-related errors
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Key generation failed")]
    GenerationFailed,
}
