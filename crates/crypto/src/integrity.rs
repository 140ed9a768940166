//! Segment and root integrity signatures
//!
//! Segment signatures are hex strings:
//! - HS256: `hex(HMAC-SHA256(key, bytes))`
//! - GMAC: `hex(last 16 bytes)`, the AEAD tag of the segment
//!
//! The manifest stores `base64(hex)` per segment and, as root signature,
//! `base64(signature over the concatenated hex segment signatures)`.
//! Comparisons are constant time.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::backend::{CryptoService, AUTH_TAG_LENGTH};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("HMAC initialization failed")]
    InitFailed,

    #[error("Unknown integrity algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Signature computation failed: {0}")]
    Backend(#[from] crate::helpers::CryptoError),

    #[error("Segment hash is not valid base64: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Segment hash is not valid UTF-8")]
    InvalidHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrityAlgorithm {
    #[default]
    Hs256,
    Gmac,
}

impl IntegrityAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityAlgorithm::Hs256 => "HS256",
            IntegrityAlgorithm::Gmac => "GMAC",
        }
    }

    /// Parse a name found in a manifest; anything unrecognized is HS256
    pub fn from_manifest(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }
}

impl FromStr for IntegrityAlgorithm {
    type Err = IntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hs256" => Ok(IntegrityAlgorithm::Hs256),
            "gmac" => Ok(IntegrityAlgorithm::Gmac),
            _ => Err(IntegrityError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for IntegrityAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calculate HMAC-SHA256 over data
///
/// This is a low-level function used by the portable backend. Engines go
/// through [`CryptoService::keyed_hash`].
pub fn calculate_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, IntegrityError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| IntegrityError::InitFailed)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Hex signature of `bytes` under `alg`
pub fn segment_signature(
    crypto: &dyn CryptoService,
    alg: IntegrityAlgorithm,
    key: &[u8],
    bytes: &[u8],
) -> Result<String, IntegrityError> {
    match alg {
        IntegrityAlgorithm::Hs256 => Ok(hex::encode(crypto.keyed_hash(key, bytes)?)),
        IntegrityAlgorithm::Gmac => {
            let start = bytes.len().saturating_sub(AUTH_TAG_LENGTH);
            Ok(hex::encode(&bytes[start..]))
        }
    }
}

/// Segment record hash: `base64(hex signature)`
pub fn segment_hash(
    crypto: &dyn CryptoService,
    alg: IntegrityAlgorithm,
    key: &[u8],
    encrypted_segment: &[u8],
) -> Result<String, IntegrityError> {
    Ok(BASE64.encode(segment_signature(crypto, alg, key, encrypted_segment)?))
}

/// Root signature over the running concatenation of hex segment signatures
pub fn root_signature(
    crypto: &dyn CryptoService,
    alg: IntegrityAlgorithm,
    key: &[u8],
    aggregate_hash: &str,
) -> Result<String, IntegrityError> {
    Ok(BASE64.encode(segment_signature(crypto, alg, key, aggregate_hash.as_bytes())?))
}

/// Rebuild the aggregate from stored segment hashes (`base64(hex)` each)
pub fn aggregate_from_segment_hashes<'a, I>(hashes: I) -> Result<String, IntegrityError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut aggregate = String::new();
    for hash in hashes {
        let decoded = BASE64.decode(hash)?;
        let hex = String::from_utf8(decoded).map_err(|_| IntegrityError::InvalidHash)?;
        aggregate.push_str(&hex);
    }
    Ok(aggregate)
}

/// Constant-time equality of two stored signature strings
pub fn signatures_match(expected: &str, computed: &str) -> bool {
    expected.as_bytes().ct_eq(computed.as_bytes()).into()
}

/// Calculate policy binding using HMAC-SHA256
///
/// 1. Base64 encode the policy JSON
/// 2. HMAC-SHA256 the base64-encoded policy using the key share
/// 3. Hex encode the HMAC result (32 bytes to 64 hex chars)
/// 4. Base64 encode the hex string for storage
pub fn calculate_policy_binding(
    crypto: &dyn CryptoService,
    policy_json: &str,
    key: &[u8],
) -> Result<String, IntegrityError> {
    let policy_base64 = BASE64.encode(policy_json);
    let hmac_result = crypto.keyed_hash(key, policy_base64.as_bytes())?;
    let hex_string = hex::encode(hmac_result);
    Ok(BASE64.encode(hex_string.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RustCryptoBackend;

    #[test]
    fn test_calculate_hmac() {
        let key = b"test_key_32_bytes_long_for_hmac!";
        let result = calculate_hmac(key, b"test data").unwrap();
        assert_eq!(result.len(), 32);
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("hs256".parse::<IntegrityAlgorithm>().unwrap(), IntegrityAlgorithm::Hs256);
        assert_eq!("GMAC".parse::<IntegrityAlgorithm>().unwrap(), IntegrityAlgorithm::Gmac);
        assert!("sha1".parse::<IntegrityAlgorithm>().is_err());
        assert_eq!(IntegrityAlgorithm::from_manifest(""), IntegrityAlgorithm::Hs256);
        assert_eq!(IntegrityAlgorithm::from_manifest("whatever"), IntegrityAlgorithm::Hs256);
    }

    #[test]
    fn test_gmac_is_trailing_tag() {
        let crypto = RustCryptoBackend::new();
        let mut segment = vec![0u8; 12];
        segment.extend_from_slice(&[0xAA; 5]);
        segment.extend_from_slice(&[0x11; 16]);
        let sig = segment_signature(&crypto, IntegrityAlgorithm::Gmac, &[0u8; 32], &segment).unwrap();
        assert_eq!(sig, "11".repeat(16));
    }

    #[test]
    fn test_root_signature_over_aggregate() {
        let crypto = RustCryptoBackend::new();
        let key = [3u8; 32];
        let h1 = segment_hash(&crypto, IntegrityAlgorithm::Hs256, &key, b"one").unwrap();
        let h2 = segment_hash(&crypto, IntegrityAlgorithm::Hs256, &key, b"two").unwrap();

        let aggregate = aggregate_from_segment_hashes([h1.as_str(), h2.as_str()]).unwrap();
        assert_eq!(aggregate.len(), 128);

        let root = root_signature(&crypto, IntegrityAlgorithm::Hs256, &key, &aggregate).unwrap();
        let reordered = aggregate_from_segment_hashes([h2.as_str(), h1.as_str()]).unwrap();
        let other = root_signature(&crypto, IntegrityAlgorithm::Hs256, &key, &reordered).unwrap();
        assert!(!signatures_match(&root, &other));
        assert!(signatures_match(&root, &root.clone()));
    }

    #[test]
    fn test_policy_binding_is_base64_of_hex() {
        let crypto = RustCryptoBackend::new();
        let policy = r#"{"body":{"dataAttributes":[]}}"#;
        let key = b"test_key_32_bytes_long_for_hmac!";

        let binding = calculate_policy_binding(&crypto, policy, key).unwrap();
        let decoded = BASE64.decode(&binding).unwrap();
        assert_eq!(decoded.len(), 64);
        assert!(decoded.iter().all(|b| b.is_ascii_hexdigit()));

        let expected = hex::encode(calculate_hmac(key, BASE64.encode(policy).as_bytes()).unwrap());
        assert_eq!(decoded, expected.as_bytes());
    }
}
