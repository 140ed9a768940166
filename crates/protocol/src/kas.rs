//! KAS (Key Access Service) protocol types
//!
//! This module contains the request/response bodies exchanged with a key
//! custodian: upsert at encrypt time, rewrap at decrypt time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::KeyAccess;

/// KAS client errors
#[derive(Debug, Error)]
pub enum KasError {
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Access denied for resource '{resource}': {reason}")]
    AccessDenied { resource: String, reason: String },

    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Invalid response from KAS: {reason}")]
    InvalidResponse {
        reason: String,
        expected: Option<String>,
    },

    #[error("Key unwrapping failed for algorithm '{algorithm}': {reason}")]
    UnwrapError { algorithm: String, reason: String },

    #[error("Cryptographic error: {operation} failed - {reason}")]
    CryptoError { operation: String, reason: String },

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("JWT error: {operation} - {reason}")]
    JwtError { operation: String, reason: String },

    #[error("HTTP request failed: {method} {url} - {reason}")]
    RequestError {
        method: String,
        url: String,
        reason: String,
    },

    #[error("Network timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid KAS configuration: {reason}")]
    ConfigError { reason: String },

    #[error("Invalid KAS URL: {0}")]
    InvalidUrl(String),
}

impl KasError {
    /// Returns true if this error might be resolved by retrying the operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KasError::HttpError { status, .. } if *status >= 500 && *status < 600,
        ) || matches!(self, KasError::Timeout { .. })
    }

    /// Returns a suggestion for how to fix this error, if available
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            KasError::AuthenticationFailed { .. } => {
                Some("Verify the bearer credential is valid and not expired")
            }
            KasError::AccessDenied { .. } => {
                Some("Check that the entity is entitled by the data attributes of the policy")
            }
            KasError::Timeout { .. } => {
                Some("Check network connectivity or increase kas.timeout_secs")
            }
            KasError::InvalidResponse { .. } => Some("Verify KAS server version compatibility"),
            KasError::InvalidUrl(_) => Some(
                "Use an HTTPS URL for the KAS endpoint (HTTP allowed only for localhost and cluster-local services)",
            ),
            _ => None,
        }
    }

    /// Returns an error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            KasError::HttpError { .. } => "HTTP_ERROR",
            KasError::AccessDenied { .. } => "ACCESS_DENIED",
            KasError::AuthenticationFailed { .. } => "AUTHENTICATION_FAILED",
            KasError::InvalidResponse { .. } => "INVALID_RESPONSE",
            KasError::UnwrapError { .. } => "UNWRAP_ERROR",
            KasError::CryptoError { .. } => "CRYPTO_ERROR",
            KasError::SerializationError(_) => "SERIALIZATION_ERROR",
            KasError::Base64Error(_) => "BASE64_ERROR",
            KasError::JwtError { .. } => "JWT_ERROR",
            KasError::RequestError { .. } => "REQUEST_ERROR",
            KasError::Timeout { .. } => "TIMEOUT",
            KasError::ConfigError { .. } => "CONFIG_ERROR",
            KasError::InvalidUrl(_) => "INVALID_URL",
        }
    }
}

/// Algorithm identifiers carried in rewrap request bodies
pub mod algorithm {
    /// RSA client key; the share comes back RSA-OAEP wrapped
    pub const RS256: &str = "RS256";
    /// EC P-256 client key; the share comes back under an ECDH session key
    pub const ES256: &str = "ES256";
}

/// Upsert request body
///
/// `clientPayloadSignature` is a JWT over the other two fields, added
/// after the body is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRequest {
    #[serde(rename = "keyAccess")]
    pub key_access: KeyAccess,
    /// Base64 policy exactly as stored in the manifest
    pub policy: String,
    #[serde(
        rename = "clientPayloadSignature",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_payload_signature: Option<String>,
}

/// Rewrap request body, serialized to a string and signed as `requestBody`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrapRequestBody {
    pub algorithm: String,
    #[serde(rename = "keyAccess")]
    pub key_access: KeyAccess,
    #[serde(rename = "clientPublicKey")]
    pub client_public_key: String,
    pub policy: String,
}

/// Claims of the signed rewrap token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrapClaims {
    #[serde(rename = "requestBody")]
    pub request_body: String,
}

/// Signed rewrap request wrapper
///
/// The `signed_request_token` field contains a compact JWT whose claims
/// are [`RewrapClaims`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRewrapRequest {
    #[serde(rename = "signedRequestToken")]
    pub signed_request_token: String,
}

/// Rewrap response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrapResponse {
    /// Base64 key share encrypted for the requesting entity
    #[serde(rename = "entityWrappedKey")]
    pub entity_wrapped_key: String,
    /// Custodian's ephemeral public key (PEM) for EC session agreement
    #[serde(
        rename = "sessionPublicKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_public_key: Option<String>,
    /// Opaque custodian metadata surfaced to the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}
