//! Streaming decryption
//!
//! The root signature is checked before any segment is read. Segments are
//! then range-read in manifest order, hash-checked, authenticated and
//! emitted strictly in sequence.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use tdf3_crypto::{
    aggregate_from_segment_hashes, root_signature, segment_signature, signatures_match,
    AesGcmCipher, Algorithm, CryptoError, CryptoService, IntegrityAlgorithm,
};
use tdf3_protocol::manifest::{IntegrityInformation, TdfManifest};
use tdf3_protocol::{FormatError, MANIFEST_ENTRY, PAYLOAD_ENTRY};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace};
use zeroize::Zeroizing;

use crate::archive::reader::find_entry;
use crate::archive::{Chunker, ZipEntry, ZipReader};
use crate::config::DecryptConfig;
use crate::encrypt::DetachedKey;
use crate::error::TdfError;
use crate::kas::KasClient;

/// Parsed central directory and manifest of a container
#[derive(Debug, Clone)]
pub struct LoadedTdf {
    pub manifest: TdfManifest,
    pub entries: Vec<ZipEntry>,
}

#[derive(Debug, Clone)]
pub struct DecryptOutcome {
    pub manifest: TdfManifest,
    /// Custodian metadata returned with the shares
    pub metadata: Option<Value>,
    pub bytes_written: u64,
}

/// Streaming decryption engine
#[derive(Debug, Clone)]
pub struct DecryptEngine {
    crypto: Arc<dyn CryptoService>,
    cipher: AesGcmCipher,
    kas: Option<KasClient>,
    options: DecryptConfig,
}

impl DecryptEngine {
    pub fn new(
        crypto: Arc<dyn CryptoService>,
        kas: Option<KasClient>,
        options: DecryptConfig,
    ) -> Self {
        DecryptEngine {
            cipher: AesGcmCipher::new(crypto.clone()),
            crypto,
            kas,
            options,
        }
    }

    fn reader<'a>(&self, chunker: &'a dyn Chunker) -> ZipReader<'a> {
        ZipReader::new(chunker).with_tail_window(self.options.tail_window)
    }

    /// Read the central directory and the manifest
    pub async fn load(&self, chunker: &dyn Chunker) -> Result<LoadedTdf, TdfError> {
        let reader = self.reader(chunker);
        let entries = reader.central_directory().await?;
        let manifest = reader.manifest(&entries, MANIFEST_ENTRY).await?;
        Ok(LoadedTdf { manifest, entries })
    }

    /// Recover the data key from the custodians and decrypt into `sink`
    ///
    /// `detached` carries the wrapped data key surfaced by a detached-mode
    /// encrypt; the custodians then hold shares of its wrapping key.
    pub async fn decrypt<W>(
        &self,
        chunker: &dyn Chunker,
        sink: W,
        detached: Option<&DetachedKey>,
    ) -> Result<DecryptOutcome, TdfError>
    where
        W: AsyncWrite + Unpin,
    {
        let kas = self
            .kas
            .as_ref()
            .ok_or_else(|| TdfError::options("decryption requires a custodian client"))?;
        let loaded = self.load(chunker).await?;
        info!(
            segments = loaded.manifest.integrity().segments.len(),
            "decrypt started"
        );

        let unwrapped = kas.unwrap_key(&loaded.manifest).await?;
        let key = match detached {
            Some(detached) => self.open_detached_key(detached, &unwrapped.key)?,
            None => unwrapped.key,
        };

        let bytes_written = self.decrypt_loaded(&loaded, chunker, &key, sink).await?;
        Ok(DecryptOutcome {
            manifest: loaded.manifest,
            metadata: unwrapped.metadata,
            bytes_written,
        })
    }

    /// Decrypt with an already recovered data key
    pub async fn decrypt_with_key<W>(
        &self,
        chunker: &dyn Chunker,
        key: &[u8],
        sink: W,
    ) -> Result<DecryptOutcome, TdfError>
    where
        W: AsyncWrite + Unpin,
    {
        let loaded = self.load(chunker).await?;
        let bytes_written = self.decrypt_loaded(&loaded, chunker, key, sink).await?;
        Ok(DecryptOutcome {
            manifest: loaded.manifest,
            metadata: None,
            bytes_written,
        })
    }

    fn open_detached_key(
        &self,
        detached: &DetachedKey,
        wrapping_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, TdfError> {
        let algorithm: Algorithm = detached.algorithm.parse()?;
        if algorithm != self.cipher.algorithm() {
            return Err(CryptoError::UnsupportedAlgorithm(detached.algorithm.clone()).into());
        }
        let wrapped = BASE64
            .decode(&detached.wrapped_key)
            .map_err(CryptoError::from)?;
        Ok(Zeroizing::new(self.cipher.decrypt(&wrapped, wrapping_key)?))
    }

    async fn decrypt_loaded<W>(
        &self,
        loaded: &LoadedTdf,
        chunker: &dyn Chunker,
        key: &[u8],
        mut sink: W,
    ) -> Result<u64, TdfError>
    where
        W: AsyncWrite + Unpin,
    {
        let integrity = loaded.manifest.integrity();
        let segment_alg = self.verify_root(integrity, key)?;
        let reader = self.reader(chunker);

        if self.options.verify_before_emit {
            let mut segments = SegmentCursor::new(&loaded.entries, integrity)?;
            while let Some((index, offset, length)) = segments.next()? {
                self.open_segment(&reader, loaded, index, offset, length, segment_alg, key)
                    .await?;
            }
            debug!(segments = integrity.segments.len(), "all segments verified");
        }

        let mut written = 0u64;
        let mut segments = SegmentCursor::new(&loaded.entries, integrity)?;
        while let Some((index, offset, length)) = segments.next()? {
            let plain = self
                .open_segment(&reader, loaded, index, offset, length, segment_alg, key)
                .await?;
            sink.write_all(&plain).await?;
            sink.flush().await?;
            written += plain.len() as u64;
            trace!(segment = index, size = plain.len(), "segment emitted");
        }

        info!(bytes = written, "decrypt finished");
        Ok(written)
    }

    /// Check the root signature and pick the segment hash algorithm
    fn verify_root(
        &self,
        integrity: &IntegrityInformation,
        key: &[u8],
    ) -> Result<IntegrityAlgorithm, TdfError> {
        let root_alg = IntegrityAlgorithm::from_manifest(&integrity.root_signature.alg);
        let segment_alg = if integrity.segment_hash_alg.trim().is_empty() {
            root_alg
        } else {
            IntegrityAlgorithm::from_manifest(&integrity.segment_hash_alg)
        };

        let aggregate =
            aggregate_from_segment_hashes(integrity.segments.iter().map(|s| s.hash.as_str()))
                .map_err(|e| TdfError::integrity(format!("malformed segment hash: {}", e)))?;
        let expected = root_signature(self.crypto.as_ref(), root_alg, key, &aggregate)?;
        if !signatures_match(&integrity.root_signature.sig, &expected) {
            return Err(TdfError::integrity("root signature mismatch"));
        }
        Ok(segment_alg)
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_segment(
        &self,
        reader: &ZipReader<'_>,
        loaded: &LoadedTdf,
        index: usize,
        offset: u64,
        length: u64,
        segment_alg: IntegrityAlgorithm,
        key: &[u8],
    ) -> Result<Vec<u8>, TdfError> {
        let encrypted = reader
            .payload_segment(&loaded.entries, PAYLOAD_ENTRY, offset, length)
            .await?;
        let signature = segment_signature(self.crypto.as_ref(), segment_alg, key, &encrypted)?;
        let stored = &loaded.manifest.integrity().segments[index].hash;
        if !signatures_match(stored, &BASE64.encode(signature)) {
            return Err(TdfError::integrity(format!(
                "hash mismatch in segment {}",
                index
            )));
        }
        self.cipher
            .decrypt(&encrypted, key)
            .map_err(|source| TdfError::Decrypt {
                segment: index,
                source,
            })
    }
}

/// Walks segment windows through the payload entry
struct SegmentCursor<'m> {
    integrity: &'m IntegrityInformation,
    payload_size: u64,
    index: usize,
    offset: u64,
}

impl<'m> SegmentCursor<'m> {
    fn new(entries: &[ZipEntry], integrity: &'m IntegrityInformation) -> Result<Self, TdfError> {
        let payload = find_entry(entries, PAYLOAD_ENTRY)?;
        Ok(SegmentCursor {
            integrity,
            payload_size: payload.compressed_size,
            index: 0,
            offset: 0,
        })
    }

    /// `(index, offset, length)` of the next window
    ///
    /// A final segment recorded without its own size is clamped to the end
    /// of the payload entry.
    fn next(&mut self) -> Result<Option<(usize, u64, u64)>, TdfError> {
        if self.index >= self.integrity.segments.len() {
            return Ok(None);
        }
        let index = self.index;
        let mut length = self.integrity.encrypted_size_of(index);
        let is_last = index + 1 == self.integrity.segments.len();
        if is_last && self.integrity.segments[index].encrypted_segment_size.is_none() {
            length = length.min(self.payload_size.saturating_sub(self.offset));
        }
        let window = (index, self.offset, length);
        self.offset = self
            .offset
            .checked_add(length)
            .ok_or(FormatError::ValueOverflow {
                field: "segment offset",
            })?;
        self.index += 1;
        Ok(Some(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::BufferChunker;
    use crate::encrypt::{EncryptEngine, EncryptOptions};
    use crate::key_access::KeyAccessTarget;
    use crate::policy::PolicyBuilder;
    use bytes::Bytes;
    use futures::stream;
    use tdf3_crypto::{key_merge, PemKeyPair, RustCryptoBackend};

    struct Fixture {
        crypto: Arc<dyn CryptoService>,
        pair: PemKeyPair,
        container: Vec<u8>,
        manifest: TdfManifest,
    }

    async fn encrypt(data: &[u8], options: EncryptOptions) -> Fixture {
        let crypto: Arc<dyn CryptoService> = Arc::new(RustCryptoBackend::new());
        let pair = crypto.generate_key_pair(2048).unwrap();
        let engine = EncryptEngine::new(crypto.clone(), None, options);
        let mut container = Vec::new();
        let outcome = engine
            .encrypt(
                vec![KeyAccessTarget::wrapped("https://kas.example.com", pair.public_key.clone())],
                &PolicyBuilder::new().build(),
                stream::iter(vec![Ok::<_, std::io::Error>(Bytes::copy_from_slice(data))]),
                &mut container,
            )
            .await
            .unwrap();
        Fixture {
            crypto,
            pair,
            container,
            manifest: outcome.manifest,
        }
    }

    impl Fixture {
        fn key(&self) -> Vec<u8> {
            let shares: Vec<_> = self
                .manifest
                .key_access()
                .iter()
                .map(|kao| {
                    let wrapped = BASE64.decode(kao.wrapped_key.as_ref().unwrap()).unwrap();
                    self.crypto
                        .decrypt_with_private_key(&wrapped, &self.pair.private_key)
                        .unwrap()
                })
                .collect();
            key_merge(&shares).unwrap().to_vec()
        }

        fn engine(&self, verify_before_emit: bool) -> DecryptEngine {
            DecryptEngine::new(
                self.crypto.clone(),
                None,
                DecryptConfig {
                    verify_before_emit,
                    ..Default::default()
                },
            )
        }

        /// Offset of the first payload byte in the container
        fn payload_start(&self) -> usize {
            30 + PAYLOAD_ENTRY.len()
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_key() {
        let data: Vec<u8> = (0..100u8).collect();
        let fixture = encrypt(&data, EncryptOptions::default().segment_size(32)).await;
        let chunker = BufferChunker::new(fixture.container.clone());
        let mut out = Vec::new();
        let outcome = fixture
            .engine(true)
            .decrypt_with_key(&chunker, &fixture.key(), &mut out)
            .await
            .unwrap();
        assert_eq!(out, data);
        assert_eq!(outcome.bytes_written, 100);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_emits_nothing() {
        let fixture = encrypt(&[5u8; 64], EncryptOptions::default().segment_size(16)).await;
        let mut container = fixture.container.clone();
        // last byte of the third segment
        container[fixture.payload_start() + 3 * 44 - 1] ^= 1;

        let chunker = BufferChunker::new(container);
        let mut out = Vec::new();
        let err = fixture
            .engine(true)
            .decrypt_with_key(&chunker, &fixture.key(), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, TdfError::ManifestIntegrity { .. }));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_gmac_body_tamper_is_a_decrypt_error() {
        let options = EncryptOptions::default()
            .segment_size(16)
            .segment_integrity_algorithm(IntegrityAlgorithm::Gmac);
        let fixture = encrypt(&[9u8; 32], options).await;
        let mut container = fixture.container.clone();
        // ciphertext byte of the second segment, past its IV, before its tag
        container[fixture.payload_start() + 44 + 13] ^= 0x80;

        let chunker = BufferChunker::new(container);
        let mut out = Vec::new();
        let err = fixture
            .engine(false)
            .decrypt_with_key(&chunker, &fixture.key(), &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, TdfError::Decrypt { segment: 1, .. }));
        // streaming mode already emitted the first segment
        assert_eq!(out, vec![9u8; 16]);
    }

    #[tokio::test]
    async fn test_wrong_key_fails_root_check() {
        let fixture = encrypt(b"payload", EncryptOptions::default()).await;
        let chunker = BufferChunker::new(fixture.container.clone());
        let mut out = Vec::new();
        let err = fixture
            .engine(true)
            .decrypt_with_key(&chunker, &[0u8; 32], &mut out)
            .await
            .unwrap_err();
        assert!(matches!(err, TdfError::ManifestIntegrity { .. }));
    }

    #[tokio::test]
    async fn test_swapped_segment_hash_emits_nothing() {
        let fixture = encrypt(&[5u8; 64], EncryptOptions::default().segment_size(16)).await;
        let key = fixture.key();
        let chunker = BufferChunker::new(fixture.container.clone());
        let engine = fixture.engine(true);
        let mut loaded = engine.load(&chunker).await.unwrap();

        // Re-sign the root so only the per-segment check can catch it
        let integrity = &mut loaded.manifest.encryption_information.integrity_information;
        integrity.segments[2].hash = integrity.segments[0].hash.clone();
        let aggregate =
            aggregate_from_segment_hashes(integrity.segments.iter().map(|s| s.hash.as_str())).unwrap();
        let root_alg = IntegrityAlgorithm::from_manifest(&integrity.root_signature.alg);
        integrity.root_signature.sig =
            root_signature(fixture.crypto.as_ref(), root_alg, &key, &aggregate).unwrap();

        let mut out = Vec::new();
        let err = engine
            .decrypt_loaded(&loaded, &chunker, &key, &mut out)
            .await
            .unwrap_err();
        match err {
            TdfError::ManifestIntegrity { reason } => assert_eq!(reason, "hash mismatch in segment 2"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_altered_root_signature_emits_nothing() {
        let fixture = encrypt(&[5u8; 40], EncryptOptions::default().segment_size(16)).await;
        let chunker = BufferChunker::new(fixture.container.clone());
        let engine = fixture.engine(false);
        let mut loaded = engine.load(&chunker).await.unwrap();

        let sig = &mut loaded
            .manifest
            .encryption_information
            .integrity_information
            .root_signature
            .sig;
        let replacement = if sig.starts_with('A') { "B" } else { "A" };
        sig.replace_range(..1, replacement);

        let mut out = Vec::new();
        let err = engine
            .decrypt_loaded(&loaded, &chunker, &fixture.key(), &mut out)
            .await
            .unwrap_err();
        match err {
            TdfError::ManifestIntegrity { reason } => assert_eq!(reason, "root signature mismatch"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_decrypt_without_custodian_client() {
        let fixture = encrypt(b"x", EncryptOptions::default()).await;
        let chunker = BufferChunker::new(fixture.container.clone());
        let err = fixture
            .engine(true)
            .decrypt(&chunker, Vec::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, TdfError::InvalidOptions { .. }));
    }

    #[test]
    fn test_cursor_clamps_unsized_last_segment() {
        let mut integrity = IntegrityInformation {
            segment_size_default: 10,
            encrypted_segment_size_default: 38,
            ..Default::default()
        };
        for _ in 0..2 {
            integrity.segments.push(tdf3_protocol::Segment {
                hash: String::new(),
                segment_size: None,
                encrypted_segment_size: None,
            });
        }
        let entries = vec![ZipEntry {
            name: PAYLOAD_ENTRY.to_string(),
            offset: 0,
            header_length: 39,
            compressed_size: 38 + 31,
            uncompressed_size: 38 + 31,
            crc32: 0,
            external_attributes: 0,
        }];
        let mut cursor = SegmentCursor::new(&entries, &integrity).unwrap();
        assert_eq!(cursor.next().unwrap(), Some((0, 0, 38)));
        assert_eq!(cursor.next().unwrap(), Some((1, 38, 31)));
        assert_eq!(cursor.next().unwrap(), None);
    }
}
