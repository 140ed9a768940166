//! Pluggable cryptographic backends
//!
//! Engines depend only on [`CryptoService`]. One backend is chosen at
//! start-up by [`select_backend`] and handed to each engine explicitly.

use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::helpers::CryptoError;

pub mod rust_crypto;

#[cfg(feature = "aws-lc-provider")]
pub mod aws_lc;

pub use rust_crypto::RustCryptoBackend;

#[cfg(feature = "aws-lc-provider")]
pub use aws_lc::AwsLcBackend;

/// Length of an AES-GCM authentication tag
pub const AUTH_TAG_LENGTH: usize = 16;
/// Smallest RSA modulus accepted for key generation
pub const MIN_RSA_BITS: usize = 2048;

/// Symmetric algorithms understood by the backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes256Gcm,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Aes256Gcm => "AES-256-GCM",
        }
    }

    pub fn key_length(&self) -> usize {
        match self {
            Algorithm::Aes256Gcm => 32,
        }
    }

    pub fn iv_length(&self) -> usize {
        match self {
            Algorithm::Aes256Gcm => 12,
        }
    }
}

impl FromStr for Algorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ciphertext with its detached authentication tag
#[derive(Debug, Clone)]
pub struct EncryptResult {
    pub payload: Vec<u8>,
    pub auth_tag: Option<Vec<u8>>,
}

/// PEM encoded asymmetric key pair
#[derive(Clone)]
pub struct PemKeyPair {
    /// SubjectPublicKeyInfo PEM
    pub public_key: String,
    /// PKCS#8 PEM
    pub private_key: Zeroizing<String>,
}

impl Debug for PemKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PemKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Capability set every backend provides
pub trait CryptoService: Send + Sync + Debug {
    /// Backend identifier for logs
    fn name(&self) -> &'static str;

    /// Encrypt `payload`, returning ciphertext and detached tag
    fn encrypt(
        &self,
        payload: &[u8],
        key: &[u8],
        iv: &[u8],
        algorithm: Algorithm,
    ) -> Result<EncryptResult, CryptoError>;

    /// Decrypt and authenticate
    ///
    /// When `auth_tag` is `None` the tag is taken from the last 16 bytes of
    /// `ciphertext`.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        algorithm: Algorithm,
        auth_tag: Option<&[u8]>,
    ) -> Result<Vec<u8>, CryptoError>;

    /// SHA-256 digest
    fn hash(&self, content: &[u8]) -> Vec<u8>;

    /// HMAC-SHA256
    fn keyed_hash(&self, key: &[u8], content: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// RSA-OAEP (SHA-1) under a SubjectPublicKeyInfo PEM
    fn encrypt_with_public_key(
        &self,
        payload: &[u8],
        public_key_pem: &str,
    ) -> Result<Vec<u8>, CryptoError>;

    /// RSA-OAEP (SHA-1) under a PKCS#8 PEM
    fn decrypt_with_private_key(
        &self,
        payload: &[u8],
        private_key_pem: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// Generate an RSA key pair of `bits` modulus size
    fn generate_key_pair(&self, bits: usize) -> Result<PemKeyPair, CryptoError>;

    /// Cryptographically secure random bytes
    fn random_bytes(&self, len: usize) -> Vec<u8>;
}

pub(crate) fn check_key_and_iv(
    algorithm: Algorithm,
    key: &[u8],
    iv: &[u8],
) -> Result<(), CryptoError> {
    if key.len() != algorithm.key_length() {
        return Err(CryptoError::InvalidKeyLength {
            expected: algorithm.key_length(),
            got: key.len(),
        });
    }
    if iv.len() != algorithm.iv_length() {
        return Err(CryptoError::InvalidIvLength {
            expected: algorithm.iv_length(),
            got: iv.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_rsa_bits(bits: usize) -> Result<(), CryptoError> {
    if bits < MIN_RSA_BITS {
        return Err(CryptoError::Asymmetric {
            operation: "RSA key generation",
            reason: format!("{bits} bits is below the {MIN_RSA_BITS}-bit minimum"),
        });
    }
    Ok(())
}

/// Split `ciphertext || tag` when no detached tag was given
pub(crate) fn split_tag<'a>(
    ciphertext: &'a [u8],
    auth_tag: Option<&'a [u8]>,
) -> Result<(&'a [u8], &'a [u8]), CryptoError> {
    match auth_tag {
        Some(tag) if tag.len() == AUTH_TAG_LENGTH => Ok((ciphertext, tag)),
        Some(tag) => Err(CryptoError::InvalidTagLength {
            expected: AUTH_TAG_LENGTH,
            got: tag.len(),
        }),
        None => {
            if ciphertext.len() < AUTH_TAG_LENGTH {
                return Err(CryptoError::CiphertextTooShort {
                    len: ciphertext.len(),
                    min: AUTH_TAG_LENGTH,
                });
            }
            Ok(ciphertext.split_at(ciphertext.len() - AUTH_TAG_LENGTH))
        }
    }
}

// AES-256-GCM, NIST test case 14: zero key, zero IV, one zero block
const KAT_PLAINTEXT: [u8; 16] = [0u8; 16];
const KAT_CIPHERTEXT: &str = "cea7403d4d606b6e074ec5d3baf39d18";
const KAT_TAG: &str = "d0d1c8a799996bf0265b98b5d48ab919";
// HMAC-SHA256, RFC 4231 test case 2
const KAT_HMAC: &str = "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843";

/// Known-answer self test run before a backend is trusted
pub fn self_test(service: &dyn CryptoService) -> Result<(), CryptoError> {
    let failed = CryptoError::OperationFailed {
        operation: "backend self test",
    };

    let key = [0u8; 32];
    let iv = [0u8; 12];
    let sealed = service.encrypt(&KAT_PLAINTEXT, &key, &iv, Algorithm::Aes256Gcm)?;
    let tag = sealed.auth_tag.as_deref().unwrap_or_default();
    if hex::encode(&sealed.payload) != KAT_CIPHERTEXT || hex::encode(tag) != KAT_TAG {
        return Err(failed);
    }
    let opened = service.decrypt(
        &sealed.payload,
        &key,
        &iv,
        Algorithm::Aes256Gcm,
        Some(tag),
    )?;
    if opened != KAT_PLAINTEXT {
        return Err(failed);
    }

    let mac = service.keyed_hash(b"Jefe", b"what do ya want for nothing?")?;
    if hex::encode(mac) != KAT_HMAC {
        return Err(failed);
    }
    Ok(())
}

/// Pick the backend for this process
///
/// The native backend is preferred when compiled in and its self test
/// passes; otherwise the portable backend is used.
pub fn select_backend() -> Arc<dyn CryptoService> {
    #[cfg(feature = "aws-lc-provider")]
    {
        let native = AwsLcBackend::new();
        match self_test(&native) {
            Ok(()) => {
                tracing::debug!(backend = native.name(), "Selected crypto backend");
                return Arc::new(native);
            }
            Err(e) => {
                tracing::warn!(backend = native.name(), error = %e, "Native crypto backend failed self test");
            }
        }
    }

    let portable = RustCryptoBackend::new();
    tracing::debug!(backend = portable.name(), "Selected crypto backend");
    Arc::new(portable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse_is_case_insensitive() {
        assert_eq!(
            "aes-256-gcm".parse::<Algorithm>().unwrap(),
            Algorithm::Aes256Gcm
        );
        assert_eq!(
            "AES-256-GCM".parse::<Algorithm>().unwrap(),
            Algorithm::Aes256Gcm
        );
        assert!(matches!(
            "aes-128-cbc".parse::<Algorithm>(),
            Err(CryptoError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_selected_backend_passes_self_test() {
        let backend = select_backend();
        assert!(self_test(backend.as_ref()).is_ok());
    }

    #[test]
    fn test_split_tag_from_tail() {
        let blob = [1u8; 20];
        let (ct, tag) = split_tag(&blob, None).unwrap();
        assert_eq!(ct.len(), 4);
        assert_eq!(tag.len(), 16);
        assert!(split_tag(&blob[..10], None).is_err());
    }
}
