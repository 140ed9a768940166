//! Streaming TDF3 containers
//!
//! A TDF3 container is a ZIP-framed artifact holding a segmented
//! AES-256-GCM payload and a JSON manifest. The data key is split across key
//! custodians and bound to an access policy; every segment and the stream as
//! a whole carry integrity signatures.
//!
//! - [`encrypt::EncryptEngine`] / [`decrypt::DecryptEngine`] stream one container
//! - [`archive`] frames and range-reads the container
//! - [`kas::KasClient`] talks to custodians (upsert and rewrap)
//! - [`TdfClient`] ties them together behind fluent builders

pub mod archive;
pub mod config;
pub mod decrypt;
pub mod encrypt;
pub mod error;
pub mod html;
pub mod kas;
pub mod key_access;
pub mod policy;
pub mod prelude;
pub mod tdf;

pub use config::{TdfConfig, MAX_SEGMENT_SIZE};
pub use decrypt::{DecryptEngine, DecryptOutcome, LoadedTdf};
pub use encrypt::{DetachedKey, EncryptEngine, EncryptOptions, EncryptOutcome};
pub use error::{ErrorKind, TdfError};
pub use html::{unwrap_html, wrap_html};
pub use kas::KasClient;
pub use key_access::KeyAccessTarget;
pub use policy::{Policy, PolicyBuilder, PolicyError};
pub use tdf::{DecryptBuilder, EncryptBuilder, TdfClient};

pub use tdf3_crypto as crypto;
pub use tdf3_protocol as protocol;
