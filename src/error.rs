//! Unified error type for the TDF3 public API
//!
//! Lower layers keep their own error types (`FormatError`, `KasError`,
//! `CryptoError`, ...). [`TdfError`] wraps them with their cause chain
//! intact, and [`ErrorKind`] groups them into the categories callers branch on.
//!
//! # Example
//!
//! ```no_run
//! use tdf3::{ErrorKind, TdfError};
//!
//! fn report(err: &TdfError) {
//!     match err.kind() {
//!         ErrorKind::Integrity => eprintln!("container was tampered with: {err}"),
//!         ErrorKind::Decrypt => eprintln!("wrong key or corrupt ciphertext: {err}"),
//!         _ => eprintln!("{err}"),
//!     }
//! }
//! ```

use std::io;

use tdf3_crypto::{CryptoError, IntegrityError, KeyError, KeySplitError};
use tdf3_protocol::{FormatError, KasError, ManifestError};
use thiserror::Error;

use crate::archive::ChunkerError;
use crate::config::ConfigError;
use crate::policy::PolicyError;

/// Error categories
///
/// Every kind except [`ErrorKind::Custodian`] is fatal for the artifact at
/// hand; custodian failures may be retried by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed container, missing entry, truncated frame
    Format,
    /// Root signature, segment hash or policy binding mismatch
    Integrity,
    /// AEAD authentication failure
    Decrypt,
    /// Upsert or rewrap failed, was denied, or timed out
    Custodian,
    /// Policy object missing required fields
    Policy,
    /// Source or sink failure, including aborts
    Io,
    /// Any other cryptographic failure
    Crypto,
    /// Invalid configuration or options
    Config,
}

/// Unified error type for all TDF3 operations
#[derive(Debug, Error)]
pub enum TdfError {
    #[error("Container format error: {0}")]
    Format(#[from] FormatError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Manifest integrity check failed: {reason}")]
    ManifestIntegrity { reason: String },

    #[error("Failed to decrypt segment {segment}")]
    Decrypt {
        segment: usize,
        #[source]
        source: CryptoError,
    },

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("KAS error: {0}")]
    Kas(#[from] KasError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Integrity computation failed: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Key split error: {0}")]
    KeySplit(#[from] KeySplitError),

    #[error("Byte limit exceeded: writing {attempted} bytes would pass the limit of {limit}")]
    ByteLimitExceeded { limit: u64, attempted: u64 },

    #[error("Source error: {0}")]
    Source(#[from] ChunkerError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("There was a problem extracting the TDF3 payload: {reason}")]
    PayloadExtraction { reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid options: {reason}")]
    InvalidOptions { reason: String },
}

impl TdfError {
    pub(crate) fn integrity(reason: impl Into<String>) -> Self {
        TdfError::ManifestIntegrity {
            reason: reason.into(),
        }
    }

    pub(crate) fn options(reason: impl Into<String>) -> Self {
        TdfError::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) | Self::Manifest(_) | Self::PayloadExtraction { .. } => {
                ErrorKind::Format
            }
            Self::ManifestIntegrity { .. } => ErrorKind::Integrity,
            Self::Decrypt { .. } => ErrorKind::Decrypt,
            Self::Policy(_) => ErrorKind::Policy,
            Self::Kas(_) => ErrorKind::Custodian,
            Self::Crypto(CryptoError::AuthenticationFailed) => ErrorKind::Decrypt,
            Self::Crypto(_)
            | Self::Integrity(_)
            | Self::Key(_)
            | Self::KeySplit(_) => ErrorKind::Crypto,
            Self::ByteLimitExceeded { .. } | Self::Source(_) | Self::Io(_) => ErrorKind::Io,
            Self::Config(_) | Self::InvalidOptions { .. } => ErrorKind::Config,
        }
    }

    /// Returns true if the error is potentially retryable
    ///
    /// Only custodian and remote-source failures qualify; the engines never
    /// retry on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kas(e) => e.is_retryable(),
            Self::Source(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Kas(e) => e.suggestion(),
            Self::Policy(e) => e.suggestion(),
            Self::ManifestIntegrity { .. } => {
                Some("The container was modified after encryption; obtain a fresh copy")
            }
            Self::Decrypt { .. } => Some("Check that every custodian returned the correct share"),
            Self::ByteLimitExceeded { .. } => {
                Some("Raise the byte limit or encrypt a smaller input")
            }
            Self::Format(_) => Some("The input is not a TDF3 container or is truncated"),
            _ => None,
        }
    }

    /// Returns a stable error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Format(_) => "TDF_E_FORMAT",
            Self::Manifest(_) => "TDF_E_MANIFEST",
            Self::ManifestIntegrity { .. } => "TDF_E_INTEGRITY",
            Self::Decrypt { .. } => "TDF_E_DECRYPT",
            Self::Policy(_) => "TDF_E_POLICY",
            Self::Kas(_) => "TDF_E_KAS",
            Self::Crypto(_) => "TDF_E_CRYPTO",
            Self::Integrity(_) => "TDF_E_INTEGRITY_COMPUTE",
            Self::Key(_) => "TDF_E_KEY",
            Self::KeySplit(_) => "TDF_E_KEY_SPLIT",
            Self::ByteLimitExceeded { .. } => "TDF_E_BYTE_LIMIT",
            Self::Source(_) => "TDF_E_SOURCE",
            Self::Io(_) => "TDF_E_IO",
            Self::PayloadExtraction { .. } => "TDF_E_PAYLOAD_EXTRACTION",
            Self::Config(_) => "TDF_E_CONFIG",
            Self::InvalidOptions { .. } => "TDF_E_OPTIONS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        let format = TdfError::Format(FormatError::CentralDirectoryNotFound);
        assert_eq!(format.kind(), ErrorKind::Format);
        assert!(!format.is_retryable());

        let integrity = TdfError::integrity("root signature mismatch");
        assert_eq!(integrity.kind(), ErrorKind::Integrity);

        let decrypt = TdfError::Decrypt {
            segment: 2,
            source: CryptoError::AuthenticationFailed,
        };
        assert_eq!(decrypt.kind(), ErrorKind::Decrypt);
        assert_ne!(decrypt.kind(), integrity.kind());

        let limit = TdfError::ByteLimitExceeded {
            limit: 10,
            attempted: 11,
        };
        assert_eq!(limit.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_custodian_retry_follows_status() {
        let unavailable = TdfError::Kas(KasError::HttpError {
            status: 503,
            message: "busy".to_string(),
        });
        assert_eq!(unavailable.kind(), ErrorKind::Custodian);
        assert!(unavailable.is_retryable());

        let denied = TdfError::Kas(KasError::AccessDenied {
            resource: "http://kas.local".to_string(),
            reason: "no".to_string(),
        });
        assert!(!denied.is_retryable());
        assert!(denied.suggestion().is_some());
    }

    #[test]
    fn test_cause_chain_preserved() {
        use std::error::Error as _;
        let err = TdfError::Decrypt {
            segment: 0,
            source: CryptoError::AuthenticationFailed,
        };
        assert!(err.source().is_some());
        assert_eq!(err.error_code(), "TDF_E_DECRYPT");
    }
}
