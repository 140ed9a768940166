//! Cryptographic helper functions
//!
//! Common utilities for key and nonce generation, plus the error type shared
//! by every backend.

use crate::types::{Nonce96, PayloadKey};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid IV length: expected {expected}, got {got}")]
    InvalidIvLength { expected: usize, got: usize },

    #[error("Invalid authentication tag length: expected {expected}, got {got}")]
    InvalidTagLength { expected: usize, got: usize },

    #[error("Ciphertext too short: {len} bytes, need at least {min}")]
    CiphertextTooShort { len: usize, min: usize },

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("{operation} failed")]
    OperationFailed { operation: &'static str },

    /// AEAD tag did not verify: wrong key or corrupt ciphertext
    #[error("Authentication tag mismatch")]
    AuthenticationFailed,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("{operation} failed: {reason}")]
    Asymmetric {
        operation: &'static str,
        reason: String,
    },

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),
}

/// Generate a random 96-bit nonce for AES-GCM
pub fn generate_nonce() -> Nonce96 {
    let mut nonce = Nonce96::default();
    OsRng.fill_bytes(nonce.as_mut_slice());
    nonce
}

/// Generate a random 32-byte key
pub fn generate_key_32() -> PayloadKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    PayloadKey(key)
}

/// Fill a fresh buffer with OS randomness
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}
