//! Streaming encryption
//!
//! Plaintext is pulled from a stream one segment window at a time. Each
//! window is sealed under a fresh IV, hashed, framed into the payload entry
//! and flushed before the next chunk is requested. The manifest and the
//! central directory close the container.

use std::io;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{Bytes, BytesMut};
use chrono::NaiveDateTime;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tdf3_crypto::{root_signature, segment_signature, AesGcmCipher, CryptoService, IntegrityAlgorithm};
use tdf3_protocol::manifest::{Payload, TdfManifest, SEGMENT_OVERHEAD};
use tdf3_protocol::zip::DEFAULT_EXTERNAL_ATTRIBUTES;
use tdf3_protocol::{MANIFEST_ENTRY, PAYLOAD_ENTRY};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};

use crate::archive::{WrittenEntry, Zip64Mode, ZipWriter};
use crate::config::{EncryptConfig, MAX_SEGMENT_SIZE};
use crate::error::TdfError;
use crate::kas::KasClient;
use crate::key_access::{KeyAccessTarget, SplitKey};
use crate::policy::Policy;

/// Data key wrapped under the key the custodians hold shares of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedKey {
    /// base64 of `IV || ciphertext || tag`
    pub wrapped_key: String,
    pub algorithm: String,
}

#[derive(Debug, Clone)]
pub struct EncryptOptions {
    pub segment_size: u64,
    pub byte_limit: Option<u64>,
    pub integrity_algorithm: IntegrityAlgorithm,
    pub segment_integrity_algorithm: IntegrityAlgorithm,
    pub zip64: Zip64Mode,
    pub mime_type: Option<String>,
    /// Custodians hold a key-encryption key instead of the data key
    pub detached: bool,
    /// Fixed record timestamp; the local clock when unset
    pub timestamp: Option<NaiveDateTime>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        EncryptOptions {
            segment_size: tdf3_protocol::manifest::DEFAULT_SEGMENT_SIZE,
            byte_limit: None,
            integrity_algorithm: IntegrityAlgorithm::Hs256,
            segment_integrity_algorithm: IntegrityAlgorithm::Hs256,
            zip64: Zip64Mode::Auto,
            mime_type: None,
            detached: false,
            timestamp: None,
        }
    }
}

impl EncryptOptions {
    pub fn from_config(config: &EncryptConfig) -> Result<Self, TdfError> {
        let parse = |name: &str| {
            name.parse::<IntegrityAlgorithm>()
                .map_err(|e| TdfError::options(e.to_string()))
        };
        Ok(EncryptOptions {
            segment_size: config.segment_size,
            byte_limit: config.byte_limit,
            integrity_algorithm: parse(&config.integrity_algorithm)?,
            segment_integrity_algorithm: parse(&config.segment_integrity_algorithm)?,
            zip64: config.zip64,
            mime_type: config.mime_type.clone(),
            ..Default::default()
        })
    }

    #[must_use]
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size;
        self
    }

    #[must_use]
    pub fn byte_limit(mut self, limit: u64) -> Self {
        self.byte_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn integrity_algorithm(mut self, alg: IntegrityAlgorithm) -> Self {
        self.integrity_algorithm = alg;
        self
    }

    #[must_use]
    pub fn segment_integrity_algorithm(mut self, alg: IntegrityAlgorithm) -> Self {
        self.segment_integrity_algorithm = alg;
        self
    }

    #[must_use]
    pub fn zip64(mut self, mode: Zip64Mode) -> Self {
        self.zip64 = mode;
        self
    }

    #[must_use]
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    #[must_use]
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn validate(&self) -> Result<(), TdfError> {
        if self.segment_size == 0 || self.segment_size > MAX_SEGMENT_SIZE {
            return Err(TdfError::options(format!(
                "segment size must be between 1 and {} bytes, got {}",
                MAX_SEGMENT_SIZE, self.segment_size
            )));
        }
        Ok(())
    }
}

/// Result of one encrypt operation
#[derive(Debug, Clone)]
pub struct EncryptOutcome {
    pub manifest: TdfManifest,
    /// Response bodies of the custodians that were synced
    pub upsert_responses: Vec<Value>,
    /// Total container bytes written to the sink
    pub bytes_written: u64,
    /// Set in detached mode
    pub detached_key: Option<DetachedKey>,
}

/// Sink wrapper that counts bytes and enforces the byte limit
struct CountingSink<W> {
    inner: W,
    written: u64,
    limit: Option<u64>,
}

impl<W: AsyncWrite + Unpin> CountingSink<W> {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TdfError> {
        let attempted = self.written + bytes.len() as u64;
        if let Some(limit) = self.limit {
            if attempted > limit {
                return Err(TdfError::ByteLimitExceeded { limit, attempted });
            }
        }
        self.inner.write_all(bytes).await?;
        self.written = attempted;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TdfError> {
        Ok(self.inner.flush().await?)
    }
}

/// Running frame state of one entry
struct EntryFrame {
    name: &'static str,
    offset: u64,
    size: u64,
    crc: crc32fast::Hasher,
}

impl EntryFrame {
    fn new(name: &'static str, offset: u64) -> Self {
        EntryFrame {
            name,
            offset,
            size: 0,
            crc: crc32fast::Hasher::new(),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        self.crc.update(bytes);
        self.size += bytes.len() as u64;
    }

    fn finish(self) -> WrittenEntry {
        WrittenEntry {
            name: self.name.to_string(),
            offset: self.offset,
            size: self.size,
            crc32: self.crc.finalize(),
            external_attributes: DEFAULT_EXTERNAL_ATTRIBUTES,
        }
    }
}

/// Streaming encryption engine
///
/// One engine may run any number of sequential or concurrent operations;
/// each call owns its manifest, accumulator and running hashes.
#[derive(Debug, Clone)]
pub struct EncryptEngine {
    crypto: Arc<dyn CryptoService>,
    cipher: AesGcmCipher,
    kas: Option<KasClient>,
    options: EncryptOptions,
}

impl EncryptEngine {
    pub fn new(
        crypto: Arc<dyn CryptoService>,
        kas: Option<KasClient>,
        options: EncryptOptions,
    ) -> Self {
        EncryptEngine {
            cipher: AesGcmCipher::new(crypto.clone()),
            crypto,
            kas,
            options,
        }
    }

    pub fn options(&self) -> &EncryptOptions {
        &self.options
    }

    /// Encrypt `source` into a container written to `sink`
    ///
    /// Remote custodians are synced before the first byte is written. A
    /// failure at any point leaves the sink without a central directory.
    pub async fn encrypt<S, W>(
        &self,
        targets: Vec<KeyAccessTarget>,
        policy: &Policy,
        mut source: S,
        sink: W,
    ) -> Result<EncryptOutcome, TdfError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.options.validate()?;
        let policy_json = policy.to_json()?;
        let split = SplitKey::new(self.crypto.clone(), targets)?;
        info!(
            segment_size = self.options.segment_size,
            detached = self.options.detached,
            "encrypt started"
        );

        let data_key = split.generate_key()?;
        let (wrapping_key, detached_key) = if self.options.detached {
            let kek = split.generate_key()?;
            // Fresh IV: kek.iv also seals each custodian's metadata
            let wrapped = self
                .cipher
                .encrypt(data_key.key.as_slice(), kek.key.as_slice(), None)?;
            let detached = DetachedKey {
                wrapped_key: BASE64.encode(wrapped),
                algorithm: self.cipher.algorithm().to_string(),
            };
            (kek, Some(detached))
        } else {
            (data_key.clone(), None)
        };

        let mut info = split.encryption_information(
            &policy_json,
            wrapping_key.key.as_slice(),
            &wrapping_key.iv,
        )?;
        let segment_size = self.options.segment_size;
        {
            let integrity = &mut info.integrity_information;
            integrity.segment_size_default = segment_size;
            integrity.encrypted_segment_size_default = segment_size + SEGMENT_OVERHEAD;
            integrity.segment_hash_alg = self.options.segment_integrity_algorithm.to_string();
            integrity.root_signature.alg = self.options.integrity_algorithm.to_string();
        }

        let upsert_responses = match &self.kas {
            Some(kas) => kas.upsert(&mut info, false).await?,
            None if info.key_access.iter().any(|kao| kao.is_remote()) => {
                return Err(TdfError::options(
                    "remote key access requires a custodian client",
                ));
            }
            None => Vec::new(),
        };

        let mut manifest = TdfManifest::new(
            Payload {
                mime_type: self.options.mime_type.clone(),
                ..Payload::default()
            },
            info,
        );

        let writer = match self.options.timestamp {
            Some(stamp) => ZipWriter::with_timestamp(self.options.zip64, stamp),
            None => ZipWriter::new(self.options.zip64),
        };
        let mut sink = CountingSink {
            inner: sink,
            written: 0,
            limit: self.options.byte_limit,
        };

        let key = data_key.key.as_slice();
        let window = segment_size as usize;
        let mut payload = EntryFrame::new(PAYLOAD_ENTRY, 0);
        sink.write(&writer.write_local_header(PAYLOAD_ENTRY)).await?;

        let mut aggregate = String::new();
        let mut accumulator = BytesMut::with_capacity(window);
        let mut pending: Option<Bytes> = None;
        let mut exhausted = false;
        let mut index = 0usize;

        while !exhausted {
            while accumulator.len() < window {
                let chunk = match pending.take() {
                    Some(chunk) => chunk,
                    None => match source.next().await {
                        Some(chunk) => chunk?,
                        None => {
                            exhausted = true;
                            break;
                        }
                    },
                };
                let take = (window - accumulator.len()).min(chunk.len());
                accumulator.extend_from_slice(&chunk[..take]);
                if take < chunk.len() {
                    pending = Some(chunk.slice(take..));
                }
            }
            if accumulator.is_empty() {
                break;
            }

            let plain = accumulator.split();
            let encrypted = self.cipher.encrypt(&plain, key, None)?;
            let signature = segment_signature(
                self.crypto.as_ref(),
                self.options.segment_integrity_algorithm,
                key,
                &encrypted,
            )?;
            aggregate.push_str(&signature);

            let plain_len = plain.len() as u64;
            let encrypted_len = encrypted.len() as u64;
            manifest.add_segment(
                BASE64.encode(&signature),
                (plain_len != segment_size).then_some(plain_len),
                (encrypted_len != segment_size + SEGMENT_OVERHEAD).then_some(encrypted_len),
            );

            payload.update(&encrypted);
            sink.write(&encrypted).await?;
            sink.flush().await?;
            trace!(segment = index, size = plain_len, "segment written");
            index += 1;
        }

        manifest.encryption_information.integrity_information.root_signature.sig = root_signature(
            self.crypto.as_ref(),
            self.options.integrity_algorithm,
            key,
            &aggregate,
        )?;
        let payload = payload.finish();
        sink.write(&writer.write_data_descriptor(payload.crc32, payload.size))
            .await?;

        let manifest_json = manifest.to_json()?;
        let mut manifest_frame = EntryFrame::new(MANIFEST_ENTRY, sink.written);
        sink.write(&writer.write_local_header(MANIFEST_ENTRY)).await?;
        manifest_frame.update(manifest_json.as_bytes());
        sink.write(manifest_json.as_bytes()).await?;
        let manifest_entry = manifest_frame.finish();
        sink.write(&writer.write_data_descriptor(manifest_entry.crc32, manifest_entry.size))
            .await?;

        let cd_offset = sink.written;
        sink.write(&writer.write_central_directory(&[payload, manifest_entry], cd_offset))
            .await?;
        sink.flush().await?;

        debug!(segments = index, "manifest finalized");
        info!(bytes = sink.written, "encrypt finished");
        Ok(EncryptOutcome {
            manifest,
            upsert_responses,
            bytes_written: sink.written,
            detached_key,
        })
    }
}
