//! TDF3 Prelude
//!
//! Commonly used types in one import.
//!
//! # Example
//!
//! ```rust
//! use tdf3::prelude::*;
//!
//! let policy = PolicyBuilder::new()
//!     .id_auto()
//!     .dissemination(["user@example.com"])
//!     .build();
//! let options = EncryptOptions::default().segment_size(64 * 1024);
//! assert_eq!(options.segment_size, 65536);
//! assert_eq!(policy.body.dissem.len(), 1);
//! ```

pub use crate::archive::{BufferChunker, Chunker, FileChunker, UrlChunker, Zip64Mode};
pub use crate::config::TdfConfig;
pub use crate::decrypt::{DecryptEngine, DecryptOutcome};
pub use crate::encrypt::{DetachedKey, EncryptEngine, EncryptOptions, EncryptOutcome};
pub use crate::error::{ErrorKind, TdfError};
pub use crate::kas::{AuthProvider, BearerTokenProvider, ClientKeyPair, KasClient};
pub use crate::key_access::KeyAccessTarget;
pub use crate::policy::{AttributeObject, Policy, PolicyBuilder, PolicyError};
pub use crate::tdf::TdfClient;

pub use tdf3_crypto::{select_backend, CryptoService, IntegrityAlgorithm};
pub use tdf3_protocol::{KasError, KeyAccess, KeyAccessType, TdfManifest};
