//! TDF3 manifest structures
//!
//! The manifest is persisted as the `0.manifest.json` container entry. It
//! carries:
//! - the payload reference
//! - one key access object per custodian
//! - the encrypted policy
//! - integrity information (segments and root signature)
//!
//! Cryptographic operations (signatures, policy binding) live in the crypto crate.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use thiserror::Error;

/// Entry name of the encrypted payload
pub const PAYLOAD_ENTRY: &str = "0.payload";
/// Entry name of the manifest
pub const MANIFEST_ENTRY: &str = "0.manifest.json";
/// Default plaintext window size (1 MiB)
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024;
/// IV (12) + GCM tag (16) added to every segment
pub const SEGMENT_OVERHEAD: u64 = 28;
pub const SCHEMA_VERSION: &str = "3.0.0";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Manifest policy is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Manifest policy is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// TDF manifest structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TdfManifest {
    pub payload: Payload,
    #[serde(rename = "encryptionInformation")]
    pub encryption_information: EncryptionInformation,
}

/// Payload reference in TDF manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub url: String,
    pub protocol: String,
    #[serde(rename = "isEncrypted")]
    pub is_encrypted: bool,
    #[serde(rename = "schemaVersion", default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            payload_type: "reference".to_string(),
            url: PAYLOAD_ENTRY.to_string(),
            protocol: "zip".to_string(),
            is_encrypted: true,
            schema_version: Some(SCHEMA_VERSION.to_string()),
            mime_type: None,
        }
    }
}

/// Encryption information in TDF manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionInformation {
    #[serde(rename = "type")]
    pub encryption_type: String,
    #[serde(rename = "keyAccess")]
    pub key_access: Vec<KeyAccess>,
    pub method: EncryptionMethod,
    #[serde(rename = "integrityInformation")]
    pub integrity_information: IntegrityInformation,
    pub policy: String,
}

impl EncryptionInformation {
    /// Set the policy from its JSON text
    pub fn set_policy_raw(&mut self, policy: &str) {
        self.policy = BASE64.encode(policy);
    }

    /// Get the decoded policy as a raw string
    pub fn get_policy_raw(&self) -> Result<String, ManifestError> {
        let bytes = BASE64.decode(&self.policy)?;
        Ok(String::from_utf8(bytes)?)
    }
}

/// Custodian binding flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAccessType {
    /// Share wrapped directly under the custodian's public key
    Wrapped,
    /// Custodian keeps the key material server-side after upsert
    Remote,
}

impl std::fmt::Display for KeyAccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyAccessType::Wrapped => write!(f, "wrapped"),
            KeyAccessType::Remote => write!(f, "remote"),
        }
    }
}

/// Policy binding: either the bare base64 HMAC or an `{alg, hash}` object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyBinding {
    Hash(String),
    Object { alg: String, hash: String },
}

impl PolicyBinding {
    pub fn hash(&self) -> &str {
        match self {
            PolicyBinding::Hash(hash) => hash,
            PolicyBinding::Object { hash, .. } => hash,
        }
    }
}

/// Key access object in manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyAccess {
    #[serde(rename = "type")]
    pub access_type: KeyAccessType,
    pub url: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "wrappedKey", default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<String>,
    #[serde(rename = "policyBinding", default, skip_serializing_if = "Option::is_none")]
    pub policy_binding: Option<PolicyBinding>,
    #[serde(rename = "encryptedMetadata", default, skip_serializing_if = "Option::is_none")]
    pub encrypted_metadata: Option<String>,
}

impl KeyAccess {
    /// Creates a new key access object for a custodian
    pub fn new(access_type: KeyAccessType, url: impl Into<String>) -> Self {
        KeyAccess {
            access_type,
            url: url.into(),
            protocol: "kas".to_string(),
            kid: None,
            wrapped_key: None,
            policy_binding: None,
            encrypted_metadata: None,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.access_type == KeyAccessType::Remote
    }

    /// Drop the fields that must not be persisted once a custodian holds the key
    pub fn strip_transient_fields(&mut self) {
        self.wrapped_key = None;
        self.encrypted_metadata = None;
        self.policy_binding = None;
    }
}

/// Encryption method configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionMethod {
    pub algorithm: String,
    #[serde(rename = "isStreamable")]
    pub is_streamable: bool,
    #[serde(default)]
    pub iv: String,
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        Self {
            algorithm: "AES-256-GCM".to_string(),
            is_streamable: true,
            iv: String::new(),
        }
    }
}

/// Integrity information including segments and root signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityInformation {
    #[serde(rename = "rootSignature")]
    pub root_signature: RootSignature,
    #[serde(
        rename = "segmentSizeDefault",
        default,
        deserialize_with = "lenient_size"
    )]
    pub segment_size_default: u64,
    #[serde(
        rename = "encryptedSegmentSizeDefault",
        default,
        deserialize_with = "lenient_size"
    )]
    pub encrypted_segment_size_default: u64,
    #[serde(rename = "segmentHashAlg", default)]
    pub segment_hash_alg: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Default for IntegrityInformation {
    fn default() -> Self {
        Self {
            root_signature: RootSignature::default(),
            segment_size_default: DEFAULT_SEGMENT_SIZE,
            encrypted_segment_size_default: DEFAULT_SEGMENT_SIZE + SEGMENT_OVERHEAD,
            segment_hash_alg: "HS256".to_string(),
            segments: Vec::new(),
        }
    }
}

impl IntegrityInformation {
    /// Encrypted window size to read for segment `index`
    ///
    /// Per-segment overrides win, then the manifest default, then the
    /// library default when the stored default is missing or zero.
    pub fn encrypted_size_of(&self, index: usize) -> u64 {
        self.segments
            .get(index)
            .and_then(|s| s.encrypted_segment_size)
            .filter(|size| *size > 0)
            .unwrap_or(if self.encrypted_segment_size_default > 0 {
                self.encrypted_segment_size_default
            } else {
                DEFAULT_SEGMENT_SIZE + SEGMENT_OVERHEAD
            })
    }

    /// Plaintext size of segment `index`
    pub fn plaintext_size_of(&self, index: usize) -> u64 {
        self.segments
            .get(index)
            .and_then(|s| s.segment_size)
            .unwrap_or(if self.segment_size_default > 0 {
                self.segment_size_default
            } else {
                DEFAULT_SEGMENT_SIZE
            })
    }
}

// Older writers stored the size defaults as strings, sometimes empty.
fn lenient_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) if s.trim().is_empty() => Ok(0),
        Size::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Root signature for integrity verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSignature {
    pub alg: String,
    pub sig: String,
}

impl Default for RootSignature {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            sig: String::new(),
        }
    }
}

/// Segment information
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub hash: String,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(rename = "segmentSize", skip_serializing_if = "Option::is_none")]
    pub segment_size: Option<u64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(
        rename = "encryptedSegmentSize",
        skip_serializing_if = "Option::is_none"
    )]
    pub encrypted_segment_size: Option<u64>,
}

impl TdfManifest {
    /// Creates a manifest around the given encryption information
    pub fn new(payload: Payload, encryption_information: EncryptionInformation) -> Self {
        TdfManifest {
            payload,
            encryption_information,
        }
    }

    /// Set the policy for the manifest using a raw string
    pub fn set_policy_raw(&mut self, policy: &str) {
        self.encryption_information.set_policy_raw(policy);
    }

    /// Get the decoded policy from the manifest as a raw string
    pub fn get_policy_raw(&self) -> Result<String, ManifestError> {
        self.encryption_information.get_policy_raw()
    }

    /// Add a segment to the manifest
    pub fn add_segment(
        &mut self,
        hash: String,
        segment_size: Option<u64>,
        encrypted_segment_size: Option<u64>,
    ) {
        self.encryption_information
            .integrity_information
            .segments
            .push(Segment {
                hash,
                segment_size,
                encrypted_segment_size,
            });
    }

    pub fn integrity(&self) -> &IntegrityInformation {
        &self.encryption_information.integrity_information
    }

    pub fn key_access(&self) -> &[KeyAccess] {
        &self.encryption_information.key_access
    }

    /// Total plaintext length described by the segment records
    pub fn plaintext_length(&self) -> u64 {
        let integrity = self.integrity();
        (0..integrity.segments.len())
            .map(|i| integrity.plaintext_size_of(i))
            .sum()
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(json)?)
    }
}
