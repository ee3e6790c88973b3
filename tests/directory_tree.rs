//! Storage tree behaviour: lookup order, deletion, reuse and timestamps

use cfb_rs::{CfbError, CompoundFile, CompoundFileBuilder, CompoundFileOptions, EntryType};
use chrono::{TimeZone, Utc};
use std::io::{Cursor, Read, Write};
use uuid::Uuid;

fn create() -> CompoundFile {
    CompoundFileBuilder::new()
        .leave_open()
        .create_in(Cursor::new(Vec::new()))
        .unwrap()
}

fn reopen(file: CompoundFile) -> CompoundFile {
    let source = file.close().unwrap().unwrap();
    let cursor = source.into_any().downcast::<Cursor<Vec<u8>>>().unwrap();
    CompoundFile::open(*cursor, CompoundFileOptions::default()).unwrap()
}

fn names(file: &CompoundFile) -> Vec<String> {
    file.root()
        .entries()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

#[test]
fn test_mixed_case_children_survive_delete() {
    let file = create();
    let root = file.root();
    for name in ["B", "a", "C"] {
        root.create_stream(name)
            .unwrap()
            .write_all(name.as_bytes())
            .unwrap();
    }

    // Same length, so uppercase comparison decides
    assert_eq!(names(&file), vec!["a", "B", "C"]);
    for name in ["B", "a", "C"] {
        assert!(root.open_stream(name).is_ok());
    }
    assert!(root.open_stream("b").is_err());

    root.delete("a").unwrap();
    let file = reopen(file);
    assert_eq!(names(&file), vec!["B", "C"]);
    for name in ["B", "C"] {
        let mut data = String::new();
        file.root()
            .open_stream(name)
            .unwrap()
            .read_to_string(&mut data)
            .unwrap();
        assert_eq!(data, name);
    }
}

#[test]
fn test_shorter_names_sort_first() {
    let file = create();
    for name in ["zz", "aaa", "y", "Bb"] {
        file.root().create_storage(name).unwrap();
    }
    assert_eq!(names(&file), vec!["y", "Bb", "zz", "aaa"]);
}

#[test]
fn test_recursive_delete_frees_sectors_for_reuse() {
    let file = create();
    let root = file.root();
    let outer = root.create_storage("outer").unwrap();
    for i in 0..3 {
        let inner = outer.create_storage(&format!("inner{}", i)).unwrap();
        inner
            .create_stream("payload")
            .unwrap()
            .write_all(&vec![i as u8; 10_000])
            .unwrap();
        inner
            .create_stream("note")
            .unwrap()
            .write_all(b"small")
            .unwrap();
    }
    let len_with_tree = file.len();

    root.delete("outer").unwrap();
    assert!(names(&file).is_empty());
    assert!(matches!(outer.entries(), Err(CfbError::EntryNotFound(_))));

    // The same amount of data fits in the released sectors
    let again = root.create_storage("again").unwrap();
    for i in 0..3 {
        again
            .create_stream(&format!("payload{}", i))
            .unwrap()
            .write_all(&vec![0xAB; 10_000])
            .unwrap();
    }
    assert_eq!(file.len(), len_with_tree);
}

#[test]
fn test_delete_then_recreate_reuses_record() {
    let file = create();
    let root = file.root();
    root.create_stream("one").unwrap();
    root.create_stream("two").unwrap();
    root.delete("one").unwrap();
    root.create_storage("three").unwrap();

    assert_eq!(names(&file), vec!["two", "three"]);
    assert!(root.delete("one").is_err());
}

#[test]
fn test_entry_info() {
    let file = create();
    let storage = file.root().create_storage("Info").unwrap();
    let clsid = Uuid::parse_str("00020906-0000-0000-c000-000000000046").unwrap();
    storage.set_clsid(clsid).unwrap();
    storage.set_state_bits(0x10).unwrap();
    storage.create_stream("data").unwrap().write_all(&[0u8; 321]).unwrap();

    let file = reopen(file);
    let entries = file.root().entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "Info");
    assert_eq!(entries[0].entry_type, EntryType::Storage);
    assert_eq!(entries[0].clsid, clsid);

    let inner = file.root().open_storage("Info").unwrap().entries().unwrap();
    assert_eq!(inner[0].entry_type, EntryType::Stream);
    assert_eq!(inner[0].length, 321);
}

#[test]
fn test_timestamp_rules() {
    let file = create();
    let when = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();

    let storage = file.root().create_storage("dated").unwrap();
    storage.set_creation_time(Some(when)).unwrap();
    storage.set_modified_time(Some(when)).unwrap();
    assert_eq!(storage.info().unwrap().creation_time, Some(when));

    let mut stream = file.root().create_stream("plain").unwrap();
    assert!(matches!(
        stream.set_creation_time(Some(when)),
        Err(CfbError::InvalidTimestamp(_))
    ));
    assert!(matches!(
        stream.set_modified_time(Some(when)),
        Err(CfbError::InvalidTimestamp(_))
    ));
    assert!(stream.set_creation_time(None).is_ok());

    assert!(matches!(
        file.root().set_creation_time(Some(when)),
        Err(CfbError::InvalidTimestamp(_))
    ));

    let file = reopen(file);
    let info = file.root().open_storage("dated").unwrap().info().unwrap();
    assert_eq!(info.modified_time, Some(when));
}

#[test]
fn test_name_validation() {
    let file = create();
    let root = file.root();
    for bad in ["", "a\\b", "a/b", "a:b", "a!b"] {
        assert!(matches!(root.create_stream(bad), Err(CfbError::NameInvalid { .. })));
    }
    assert!(root.create_stream(&"n".repeat(31)).is_ok());
    assert!(matches!(
        root.create_storage(&"n".repeat(32)),
        Err(CfbError::NameInvalid { .. })
    ));
    assert!(matches!(root.create_storage(&"n".repeat(31)), Err(CfbError::EntryExists(_))));
}

#[test]
fn test_copy_between_files() {
    let source = create();
    let docs = source.root().create_storage("docs").unwrap();
    docs.create_stream("a").unwrap().write_all(b"alpha").unwrap();
    docs.create_storage("sub")
        .unwrap()
        .create_stream("b")
        .unwrap()
        .write_all(&vec![2u8; 8000])
        .unwrap();

    let target = create();
    source.root().copy_to(&target.root()).unwrap();

    let target = reopen(target);
    let docs = target.root().open_storage("docs").unwrap();
    let mut b = Vec::new();
    docs.open_storage("sub")
        .unwrap()
        .open_stream("b")
        .unwrap()
        .read_to_end(&mut b)
        .unwrap();
    assert_eq!(b, vec![2u8; 8000]);
}
