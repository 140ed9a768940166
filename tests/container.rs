//! Container framing tests
//!
//! Containers produced here must open in a general-purpose ZIP reader, and
//! the reader must cope with Zip64 records and mismatched header lengths it
//! did not write itself.

mod common;

use std::io::{Cursor, Read};

use common::*;
use tdf3::archive::{BufferChunker, FileChunker, WrittenEntry, Zip64Mode, ZipReader, ZipWriter};
use tdf3::config::DecryptConfig;
use tdf3::protocol::zip::DEFAULT_EXTERNAL_ATTRIBUTES;
use tdf3::protocol::TdfManifest;
use tdf3::{DecryptEngine, KeyAccessTarget, Policy, PolicyBuilder};

fn policy() -> Policy {
    PolicyBuilder::new()
        .id("b4a9a8d6-5a4c-4d86-9c2a-2e1e5c1d0f7e")
        .attribute("https://example.com/attr/classification/value/secret")
        .dissem("user@example.com")
        .build()
}

async fn encrypt_with(mode: Zip64Mode, data: &[u8]) -> (Vec<u8>, TdfManifest) {
    let client = tdf_client(None);
    let (container, outcome) = client
        .encrypt()
        .wrapped("https://kas.example.com", custodian_keys()[0].public_key.clone())
        .policy(policy())
        .segment_size(256)
        .zip64(mode)
        .to_bytes(data.to_vec())
        .await
        .unwrap();
    (container, outcome.manifest)
}

fn read_with_zip_crate(container: Vec<u8>) -> (Vec<String>, Vec<u8>, String) {
    let mut archive = zip::ZipArchive::new(Cursor::new(container)).unwrap();
    let names = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();

    let mut payload = Vec::new();
    archive
        .by_name("0.payload")
        .unwrap()
        .read_to_end(&mut payload)
        .unwrap();
    let mut manifest = String::new();
    archive
        .by_name("0.manifest.json")
        .unwrap()
        .read_to_string(&mut manifest)
        .unwrap();
    (names, payload, manifest)
}

#[tokio::test]
async fn test_zip_crate_reads_auto_container() {
    let data = pattern(1000);
    let (container, manifest) = encrypt_with(Zip64Mode::Auto, &data).await;
    let (names, payload, manifest_json) = read_with_zip_crate(container);

    assert_eq!(names, ["0.payload", "0.manifest.json"]);
    let expected_payload: u64 = (0..manifest.integrity().segments.len())
        .map(|i| manifest.integrity().encrypted_size_of(i))
        .sum();
    assert_eq!(payload.len() as u64, expected_payload);
    assert_eq!(TdfManifest::from_json(&manifest_json).unwrap(), manifest);
}

#[tokio::test]
async fn test_zip_crate_reads_always_zip64_container() {
    let data = pattern(700);
    let (container, manifest) = encrypt_with(Zip64Mode::Always, &data).await;
    let (names, payload, manifest_json) = read_with_zip_crate(container);

    assert_eq!(names.len(), 2);
    assert_eq!(payload.len(), 700 + 3 * 28);
    assert_eq!(TdfManifest::from_json(&manifest_json).unwrap(), manifest);
}

#[tokio::test]
async fn test_reader_entries_match_zip_crate() {
    let (container, _) = encrypt_with(Zip64Mode::Auto, TEST_PLAINTEXT).await;
    let chunker = BufferChunker::new(container.clone());
    let entries = ZipReader::new(&chunker).central_directory().await.unwrap();

    let mut archive = zip::ZipArchive::new(Cursor::new(container)).unwrap();
    for entry in &entries {
        let file = archive.by_name(&entry.name).unwrap();
        assert_eq!(file.compressed_size(), entry.compressed_size);
        assert_eq!(file.crc32(), entry.crc32);
        assert_eq!(file.header_start(), entry.offset);
        assert_eq!(entry.external_attributes, DEFAULT_EXTERNAL_ATTRIBUTES);
    }
}

#[tokio::test]
async fn test_zip64_sizes_beyond_u32() {
    // Declared size needs the Zip64 extra; only the first bytes exist
    let declared = 5_000_000_000u64;
    let writer = ZipWriter::new(Zip64Mode::Auto);
    let mut bytes = writer.write_local_header("0.payload");
    bytes.extend_from_slice(b"abcdef");
    let cd_offset = bytes.len() as u64;
    let record = writer.write_central_directory_record(
        declared,
        "0.payload",
        0,
        0,
        DEFAULT_EXTERNAL_ATTRIBUTES,
    );
    let cd_size = record.len() as u64;
    bytes.extend(record);
    bytes.extend(writer.write_end_of_central_directory(1, cd_size, cd_offset));

    let chunker = BufferChunker::new(bytes);
    let reader = ZipReader::new(&chunker);
    let entries = reader.central_directory().await.unwrap();
    assert_eq!(entries[0].compressed_size, declared);
    assert_eq!(entries[0].uncompressed_size, declared);

    let window = reader
        .payload_segment(&entries, "0.payload", 2, 3)
        .await
        .unwrap();
    assert_eq!(&window[..], b"cde");
}

#[tokio::test]
async fn test_local_header_length_taken_from_local_header() {
    // Local header with a Zip64 extra, central directory without one
    let local = ZipWriter::new(Zip64Mode::Always);
    let central = ZipWriter::new(Zip64Mode::Auto);
    let data = b"payload bytes";

    let mut bytes = local.write_local_header("0.payload");
    bytes.extend_from_slice(data);
    let crc = crc32fast::hash(data);
    bytes.extend(local.write_data_descriptor(crc, data.len() as u64));
    let cd_offset = bytes.len() as u64;
    bytes.extend(central.write_central_directory(
        &[WrittenEntry {
            name: "0.payload".to_string(),
            offset: 0,
            size: data.len() as u64,
            crc32: crc,
            external_attributes: DEFAULT_EXTERNAL_ATTRIBUTES,
        }],
        cd_offset,
    ));

    let chunker = BufferChunker::new(bytes);
    let reader = ZipReader::new(&chunker);
    let entries = reader.central_directory().await.unwrap();
    assert_eq!(entries[0].header_length, 30 + 9 + 28);
    let read = reader.entry_bytes(&entries, "0.payload").await.unwrap();
    assert_eq!(&read[..], data);
}

#[tokio::test]
async fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("plain.txt");
    let output = dir.path().join("plain.txt.tdf");
    let data = pattern(3 * 1024 + 17);
    tokio::fs::write(&input, &data).await.unwrap();

    let client = tdf_client(None);
    let outcome = client
        .encrypt()
        .target(KeyAccessTarget::wrapped(
            "https://kas.example.com",
            custodian_keys()[1].public_key.clone(),
        ))
        .policy(policy())
        .segment_size(1024)
        .to_file(&input, &output)
        .await
        .unwrap();
    let on_disk = tokio::fs::metadata(&output).await.unwrap().len();
    assert_eq!(on_disk, outcome.bytes_written);

    let key = recover_key(&outcome.manifest, &[custodian_keys()[1].private_key.as_str()]);
    let engine = DecryptEngine::new(crypto(), None, DecryptConfig::default());
    let chunker = FileChunker::new(&output);
    let mut plaintext = Vec::new();
    engine
        .decrypt_with_key(&chunker, &key, &mut plaintext)
        .await
        .unwrap();
    assert_eq!(plaintext, data);
}

#[tokio::test]
async fn test_small_tail_window_still_loads() {
    let (container, manifest) = encrypt_with(Zip64Mode::Always, TEST_PLAINTEXT).await;
    let engine = DecryptEngine::new(
        crypto(),
        None,
        DecryptConfig {
            tail_window: 64,
            ..DecryptConfig::default()
        },
    );
    let loaded = engine.load(&BufferChunker::new(container)).await.unwrap();
    assert_eq!(loaded.manifest, manifest);
    assert_eq!(loaded.entries.len(), 2);
}
