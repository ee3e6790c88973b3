//! Stream write / read round trips across sector and cutoff boundaries

use cfb_rs::{CfbError, CompoundFile, CompoundFileBuilder, CompoundFileOptions, Version};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

fn create(version: Version) -> CompoundFile {
    CompoundFileBuilder::new()
        .version(version)
        .leave_open()
        .create_in(Cursor::new(Vec::new()))
        .unwrap()
}

/// Close a file created with `leave_open` and reopen its bytes
fn reopen(file: CompoundFile) -> CompoundFile {
    let source = file.close().unwrap().unwrap();
    let cursor = source.into_any().downcast::<Cursor<Vec<u8>>>().unwrap();
    CompoundFile::open(*cursor, CompoundFileOptions::default()).unwrap()
}

fn read_all(file: &CompoundFile, name: &str) -> Vec<u8> {
    let mut data = Vec::new();
    file.root()
        .open_stream(name)
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    data
}

#[test]
fn test_boundary_sizes_round_trip() {
    let sizes = [0usize, 1, 63, 64, 512, 513, 4095, 4096, 4097, 512 * 40 + 7];

    let file = create(Version::V3);
    for size in sizes {
        let name = format!("s{}", size);
        let mut stream = file.root().create_stream(&name).unwrap();
        stream.write_all(&pattern(size)).unwrap();
        assert_eq!(stream.len().unwrap(), size as u64);
    }

    let file = reopen(file);
    for size in sizes {
        assert_eq!(read_all(&file, &format!("s{}", size)), pattern(size), "size {}", size);
    }
}

#[test]
fn test_new_stream_is_empty() {
    let file = create(Version::V3);
    file.root().create_stream("empty").unwrap();

    let mut stream = file.root().open_stream("empty").unwrap();
    assert_eq!(stream.len().unwrap(), 0);
    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_cutoff_routes_to_mini_stream() {
    let file = create(Version::V3);
    file.root()
        .create_stream("below")
        .unwrap()
        .write_all(&pattern(4095))
        .unwrap();
    let after_mini = file.header();
    assert_eq!(after_mini.mini_fat_sector_count, 1);

    let len_before = file.len();
    file.root()
        .create_stream("at")
        .unwrap()
        .write_all(&pattern(4096))
        .unwrap();

    // 4096 bytes go to eight regular sectors, the Mini-FAT is untouched
    assert_eq!(file.header().mini_fat_sector_count, 1);
    assert_eq!(file.len(), len_before + 8 * 512);
}

#[test]
fn test_version_4_round_trip() {
    let file = create(Version::V4);
    assert_eq!(file.header().sector_size(), 4096);

    let docs = file.root().create_storage("Docs").unwrap();
    docs.create_stream("small").unwrap().write_all(&pattern(100)).unwrap();
    docs.create_stream("large").unwrap().write_all(&pattern(50_000)).unwrap();

    let file = reopen(file);
    assert_eq!(file.header().version, Version::V4);
    let docs = file.root().open_storage("Docs").unwrap();
    let mut small = Vec::new();
    docs.open_stream("small").unwrap().read_to_end(&mut small).unwrap();
    let mut large = Vec::new();
    docs.open_stream("large").unwrap().read_to_end(&mut large).unwrap();
    assert_eq!(small, pattern(100));
    assert_eq!(large, pattern(50_000));
}

#[test]
fn test_seek_and_overwrite() {
    let file = create(Version::V3);
    let mut stream = file.root().create_stream("s").unwrap();
    stream.write_all(&pattern(3000)).unwrap();

    stream.seek(SeekFrom::Start(1000)).unwrap();
    stream.write_all(&[0xEE; 10]).unwrap();
    assert_eq!(stream.position(), 1010);

    stream.seek(SeekFrom::End(-5)).unwrap();
    let mut tail = Vec::new();
    stream.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &pattern(3000)[2995..]);

    let mut expected = pattern(3000);
    expected[1000..1010].fill(0xEE);
    assert_eq!(read_all(&file, "s"), expected);

    assert!(stream.seek(SeekFrom::Current(-100_000)).is_err());
}

#[test]
fn test_write_past_end_zero_fills() {
    let file = create(Version::V3);
    let mut stream = file.root().create_stream("gap").unwrap();
    stream.write_all(b"head").unwrap();
    stream.seek(SeekFrom::Start(6000)).unwrap();
    stream.write_all(b"tail").unwrap();

    let data = read_all(&file, "gap");
    assert_eq!(data.len(), 6004);
    assert_eq!(&data[..4], b"head");
    assert!(data[4..6000].iter().all(|&b| b == 0));
    assert_eq!(&data[6000..], b"tail");
}

#[test]
fn test_set_len_crosses_cutoff_both_ways() {
    let file = create(Version::V3);
    let mut stream = file.root().create_stream("s").unwrap();
    stream.write_all(&pattern(2000)).unwrap();

    stream.set_len(10_000).unwrap();
    let grown = read_all(&file, "s");
    assert_eq!(&grown[..2000], &pattern(2000)[..]);
    assert!(grown[2000..].iter().all(|&b| b == 0));

    stream.set_len(100).unwrap();
    assert_eq!(read_all(&file, "s"), pattern(100));

    let file = reopen(file);
    assert_eq!(read_all(&file, "s"), pattern(100));
}

#[test]
fn test_many_streams_grow_directory() {
    let file = create(Version::V3);
    for i in 0..40 {
        file.root()
            .create_stream(&format!("stream{:02}", i))
            .unwrap()
            .write_all(&pattern(i * 50))
            .unwrap();
    }

    let file = reopen(file);
    assert_eq!(file.root().entries().unwrap().len(), 40);
    for i in 0..40 {
        assert_eq!(read_all(&file, &format!("stream{:02}", i)), pattern(i * 50));
    }
}

#[test]
fn test_read_only_rejects_writes() {
    let file = create(Version::V3);
    file.root().create_stream("s").unwrap().write_all(b"x").unwrap();
    let source = file.close().unwrap().unwrap();
    let cursor = source.into_any().downcast::<Cursor<Vec<u8>>>().unwrap();

    let file = CompoundFileBuilder::new().read_only().open_in(*cursor).unwrap();
    let mut stream = file.root().open_stream("s").unwrap();
    assert!(stream.write_all(b"y").is_err());
    assert!(matches!(
        file.root().create_stream("t"),
        Err(CfbError::NotWritable(_))
    ));
    assert_eq!(read_all(&file, "s"), b"x");
}
