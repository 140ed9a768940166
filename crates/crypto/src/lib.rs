//! TDF3 Cryptographic Operations
//!
//! This crate provides the cryptographic layer of the TDF3 container:
//! - A [`CryptoService`] capability trait with a portable RustCrypto backend
//!   and an optional native aws-lc backend
//! - AES-256-GCM segment framing (`IV || ciphertext || tag`)
//! - XOR secret sharing of the data key across custodians
//! - HS256 / GMAC segment and root integrity signatures
//! - EC session-key agreement for custodian rewrap responses
//!
//! # Security Features
//!
//! - **Zeroization**: Key material and recovered shares use `zeroize` to clear memory on drop
//! - **Constant-time comparison**: Signature verification uses `subtle::ConstantTimeEq`
//! - **Self-tested backends**: The native backend is only selected after a known-answer test
//!
//! # Example
//!
//! ```
//! use tdf3_crypto::{key_merge, key_split, select_backend, AesGcmCipher};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cipher = AesGcmCipher::new(select_backend());
//! let key = cipher.generate_key()?;
//!
//! let sealed = cipher.encrypt(b"sensitive information", key.as_slice(), None)?;
//! let shares = key_split(key.as_slice(), 3)?;
//! let merged = key_merge(&shares)?;
//!
//! let opened = cipher.decrypt(&sealed, &merged)?;
//! assert_eq!(opened, b"sensitive information");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cipher;
pub mod helpers;
pub mod integrity;
pub mod key_split;
pub mod keys;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{
    self_test, select_backend, Algorithm, CryptoService, EncryptResult, PemKeyPair,
    RustCryptoBackend, AUTH_TAG_LENGTH, MIN_RSA_BITS,
};
pub use cipher::{AesGcmCipher, IV_LENGTH, SEGMENT_OVERHEAD};
pub use helpers::{generate_key_32, generate_nonce, random_bytes, CryptoError};
pub use integrity::{
    aggregate_from_segment_hashes, calculate_hmac, calculate_policy_binding, root_signature,
    segment_hash, segment_signature, signatures_match, IntegrityAlgorithm, IntegrityError,
};
pub use key_split::{key_merge, key_split, KeyShare, KeySplitError};
pub use keys::extract_pem_from_key_string;
pub use session::{
    derive_session_key, generate_ec_key_pair, open_session_payload, seal_session_payload,
};
pub use types::{KeyError, KeyInfo, Nonce96, PayloadKey};

#[cfg(feature = "aws-lc-provider")]
pub use backend::AwsLcBackend;

// Re-export underlying crypto libraries used in public signatures
pub use p256;
pub use rsa;
pub use sha2;
pub use zeroize;
