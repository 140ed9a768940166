//! TDF3 Protocol Types
//!
//! This crate contains protocol types and structures for TDF3, including:
//! - KAS (Key Access Service) upsert and rewrap request/response types
//! - TDF manifest structures
//! - ZIP container records and little-endian binary helpers
//!
//! This crate contains NO cryptographic operations and NO I/O.
//! It is purely focused on data structures and serialization.

pub mod binary;
pub mod kas;
pub mod manifest;
pub mod zip;

// Re-export commonly used types
pub use kas::{
    KasError, RewrapClaims, RewrapRequestBody, RewrapResponse, SignedRewrapRequest,
    UpsertRequest,
};

pub use manifest::{
    EncryptionInformation, EncryptionMethod, IntegrityInformation, KeyAccess, KeyAccessType,
    ManifestError, Payload, PolicyBinding, RootSignature, Segment, TdfManifest, MANIFEST_ENTRY,
    PAYLOAD_ENTRY,
};

pub use zip::{DosDateTime, FormatError};
