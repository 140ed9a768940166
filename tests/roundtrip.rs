//! Encrypt/decrypt round trips without a custodian service
//!
//! The data key is recovered directly from the key access objects with the
//! custodian private keys, then handed to the decrypt engine.

mod common;

use std::io;

use bytes::Bytes;
use common::*;
use futures::stream;
use proptest::prelude::*;
use tdf3::archive::BufferChunker;
use tdf3::config::DecryptConfig;
use tdf3::crypto::IntegrityAlgorithm;
use tdf3::policy::PolicyBuilder;
use tdf3::{DecryptEngine, EncryptEngine, EncryptOptions, KeyAccessTarget, TdfError};

fn targets(count: usize) -> Vec<KeyAccessTarget> {
    custodian_keys()
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, pair)| {
            KeyAccessTarget::wrapped(format!("https://kas{}.example.com", i), pair.public_key.clone())
        })
        .collect()
}

fn private_pems(count: usize) -> Vec<&'static str> {
    custodian_keys()
        .iter()
        .take(count)
        .map(|pair| pair.private_key.as_str())
        .collect()
}

/// Encrypt `chunks` as a stream, then decrypt with the recovered key
async fn round_trip(
    options: EncryptOptions,
    custodians: usize,
    chunks: Vec<Vec<u8>>,
    verify_before_emit: bool,
) -> Result<(Vec<u8>, tdf3::EncryptOutcome), TdfError> {
    let engine = EncryptEngine::new(crypto(), None, options);
    let policy = PolicyBuilder::new().id_auto().dissem("user@example.com").build();
    let source = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, io::Error>(Bytes::from(chunk))),
    );
    let mut container = Vec::new();
    let outcome = engine
        .encrypt(targets(custodians), &policy, source, &mut container)
        .await?;
    assert_eq!(outcome.bytes_written, container.len() as u64);

    let key = recover_key(&outcome.manifest, &private_pems(custodians));
    let decrypt = DecryptEngine::new(
        crypto(),
        None,
        DecryptConfig {
            verify_before_emit,
            ..DecryptConfig::default()
        },
    );
    let chunker = BufferChunker::new(container);
    let mut plaintext = Vec::new();
    let decrypted = decrypt
        .decrypt_with_key(&chunker, &key, &mut plaintext)
        .await?;
    assert_eq!(decrypted.bytes_written, plaintext.len() as u64);
    Ok((plaintext, outcome))
}

#[tokio::test]
async fn test_segment_boundaries() {
    let segment = 1024u64;
    for len in [segment as usize - 1, segment as usize, segment as usize + 1] {
        let data = pattern(len);
        let options = EncryptOptions::default().segment_size(segment);
        let (plaintext, outcome) = round_trip(options, 1, vec![data.clone()], true)
            .await
            .unwrap();
        assert_eq!(plaintext, data, "length {}", len);

        let integrity = outcome.manifest.integrity();
        let expected_segments = len.div_ceil(segment as usize);
        assert_eq!(integrity.segments.len(), expected_segments);
        assert_eq!(outcome.manifest.plaintext_length(), len as u64);
        for (i, record) in integrity.segments.iter().enumerate() {
            let full = i + 1 < expected_segments || len % segment as usize == 0;
            assert_eq!(record.segment_size.is_none(), full, "segment {}", i);
        }
    }
}

#[tokio::test]
async fn test_many_small_chunks_three_custodians() {
    let data = pattern(10_000);
    let chunks: Vec<Vec<u8>> = data.chunks(7).map(<[u8]>::to_vec).collect();
    let options = EncryptOptions::default().segment_size(512);
    let (plaintext, outcome) = round_trip(options, 3, chunks, false).await.unwrap();
    assert_eq!(plaintext, data);
    assert_eq!(outcome.manifest.key_access().len(), 3);
    assert_eq!(outcome.manifest.integrity().segments.len(), 20);
}

#[tokio::test]
async fn test_large_chunks_spanning_segments() {
    let data = pattern(5 * 4096 + 100);
    let chunks = vec![data[..9000].to_vec(), data[9000..].to_vec()];
    let options = EncryptOptions::default().segment_size(4096);
    let (plaintext, _) = round_trip(options, 2, chunks, true).await.unwrap();
    assert_eq!(plaintext, data);
}

#[tokio::test]
async fn test_gmac_integrity() {
    let data = pattern(3000);
    let options = EncryptOptions::default()
        .segment_size(1000)
        .integrity_algorithm(IntegrityAlgorithm::Gmac)
        .segment_integrity_algorithm(IntegrityAlgorithm::Gmac);
    let (plaintext, outcome) = round_trip(options, 1, vec![data.clone()], true)
        .await
        .unwrap();
    assert_eq!(plaintext, data);
    let integrity = outcome.manifest.integrity();
    assert_eq!(integrity.root_signature.alg, "GMAC");
    assert_eq!(integrity.segment_hash_alg, "GMAC");
}

#[tokio::test]
async fn test_empty_plaintext() {
    let (plaintext, outcome) = round_trip(EncryptOptions::default(), 1, Vec::new(), true)
        .await
        .unwrap();
    assert!(plaintext.is_empty());
    assert!(outcome.manifest.integrity().segments.is_empty());
    assert_eq!(outcome.manifest.plaintext_length(), 0);
}

#[tokio::test]
async fn test_empty_chunks_are_skipped() {
    let chunks = vec![Vec::new(), b"abc".to_vec(), Vec::new(), b"def".to_vec()];
    let options = EncryptOptions::default().segment_size(4);
    let (plaintext, outcome) = round_trip(options, 1, chunks, true).await.unwrap();
    assert_eq!(plaintext, b"abcdef");
    assert_eq!(outcome.manifest.integrity().segments.len(), 2);
}

#[tokio::test]
async fn test_byte_limit_allows_exact_fit() {
    let options = EncryptOptions::default();
    let (_, outcome) = round_trip(options, 1, vec![TEST_PLAINTEXT.to_vec()], true)
        .await
        .unwrap();
    let exact = outcome.bytes_written;

    let (plaintext, _) = round_trip(
        EncryptOptions::default().byte_limit(exact + 64),
        1,
        vec![TEST_PLAINTEXT.to_vec()],
        true,
    )
    .await
    .unwrap();
    assert_eq!(plaintext, TEST_PLAINTEXT);

    let err = round_trip(
        EncryptOptions::default().byte_limit(exact - 200),
        1,
        vec![TEST_PLAINTEXT.to_vec()],
        true,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TdfError::ByteLimitExceeded { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_round_trip_any_chunking(
        data in proptest::collection::vec(any::<u8>(), 0..2048),
        segment_size in 1u64..600,
        split in 1usize..64,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let chunks: Vec<Vec<u8>> = data.chunks(split).map(<[u8]>::to_vec).collect();
        let options = EncryptOptions::default().segment_size(segment_size);
        let (plaintext, outcome) = runtime
            .block_on(round_trip(options, 1, chunks, false))
            .unwrap();
        prop_assert_eq!(&plaintext, &data);
        prop_assert_eq!(outcome.manifest.plaintext_length(), data.len() as u64);
    }
}
