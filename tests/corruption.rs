//! Damaged headers and chains are rejected, not followed

use cfb_rs::{CfbError, CompoundFile, CompoundFileBuilder, CompoundFileOptions};
use std::io::{Cursor, Read, Write};

/// Bytes of a fresh V3 file holding one 5000-byte stream
///
/// Sector 0 is the FAT, sector 1 the directory and the stream occupies
/// sectors 2..=11.
fn sample() -> Vec<u8> {
    let file = CompoundFileBuilder::new()
        .leave_open()
        .create_in(Cursor::new(Vec::new()))
        .unwrap();
    file.root()
        .create_stream("s")
        .unwrap()
        .write_all(&[0x5A; 5000])
        .unwrap();
    let source = file.close().unwrap().unwrap();
    source
        .into_any()
        .downcast::<Cursor<Vec<u8>>>()
        .unwrap()
        .into_inner()
}

fn open(bytes: Vec<u8>) -> cfb_rs::Result<CompoundFile> {
    CompoundFile::open(Cursor::new(bytes), CompoundFileOptions::default())
}

fn set_fat_entry(bytes: &mut [u8], index: usize, value: u32) {
    let offset = 512 + index * 4;
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn test_sample_is_sound() {
    let file = open(sample()).unwrap();
    let mut data = Vec::new();
    file.root()
        .open_stream("s")
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    assert_eq!(data, vec![0x5A; 5000]);
}

#[test]
fn test_bad_signature() {
    let mut bytes = sample();
    bytes[0] = 0;
    assert!(matches!(open(bytes), Err(CfbError::InvalidSignature)));
}

#[test]
fn test_unsupported_version() {
    let mut bytes = sample();
    bytes[26] = 5;
    assert!(matches!(
        open(bytes),
        Err(CfbError::UnsupportedVersion { major: 5, .. })
    ));
}

#[test]
fn test_truncated_file() {
    let bytes = sample()[..100].to_vec();
    assert!(matches!(open(bytes), Err(CfbError::HeaderCorrupt(_))));
}

#[test]
fn test_chain_cycle_detected() {
    let mut bytes = sample();
    set_fat_entry(&mut bytes, 3, 2);

    let file = open(bytes).unwrap();
    let mut stream = file.root().open_stream("s").unwrap();
    assert!(matches!(
        stream.set_len(6000),
        Err(CfbError::ChainCorruption(_))
    ));
}

#[test]
fn test_chain_into_reserved_id() {
    let mut bytes = sample();
    set_fat_entry(&mut bytes, 4, 0xFFFF_FFFD);

    let file = open(bytes).unwrap();
    let stream = file.root().open_stream("s").unwrap();
    let mut buf = vec![0u8; 5000];
    assert!(matches!(
        stream.read_at(0, &mut buf),
        Err(CfbError::ChainCorruption(_))
    ));
}

#[test]
fn test_short_chain_reads_what_exists() {
    let mut bytes = sample();
    // End the chain after three sectors
    set_fat_entry(&mut bytes, 4, 0xFFFF_FFFE);

    let file = open(bytes).unwrap();
    let stream = file.root().open_stream("s").unwrap();
    let mut buf = vec![0u8; 5000];
    assert_eq!(stream.read_at(0, &mut buf).unwrap(), 3 * 512);
}
