//! Property-based tests for allocation and stream contents
//!
//! Uses proptest to check that random sequences of writes, resizes and
//! deletes keep every stream intact and never leak sectors.

use cfb_rs::{CompoundFile, CompoundFileBuilder};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

fn create() -> CompoundFile {
    CompoundFileBuilder::new()
        .leave_open()
        .create_in(Cursor::new(Vec::new()))
        .unwrap()
}

fn reopen(file: CompoundFile) -> CompoundFile {
    let source = file.close().unwrap().unwrap();
    let cursor = source.into_any().downcast::<Cursor<Vec<u8>>>().unwrap();
    CompoundFileBuilder::new()
        .leave_open()
        .open_in(*cursor)
        .unwrap()
}

fn contents(file: &CompoundFile, name: &str) -> Vec<u8> {
    let mut data = Vec::new();
    file.root()
        .open_stream(name)
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    data
}

#[derive(Debug, Clone)]
enum Op {
    Write { stream: u8, offset: u16, len: u16, byte: u8 },
    SetLen { stream: u8, len: u16 },
    Delete { stream: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 0u16..12_000, 1u16..6_000, any::<u8>())
            .prop_map(|(stream, offset, len, byte)| Op::Write { stream, offset, len, byte }),
        (0u8..4, 0u16..12_000).prop_map(|(stream, len)| Op::SetLen { stream, len }),
        (0u8..4).prop_map(|stream| Op::Delete { stream }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_streams_match_model(ops in prop::collection::vec(op(), 1..25)) {
        let file = create();
        let root = file.root();
        let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();

        for op in &ops {
            match *op {
                Op::Write { stream, offset, len, byte } => {
                    let name = format!("s{}", stream);
                    let handle = if model.contains_key(&name) {
                        root.open_stream(&name).unwrap()
                    } else {
                        root.create_stream(&name).unwrap()
                    };
                    let data = model.entry(name).or_default();
                    let (offset, len) = (offset as usize, len as usize);
                    if data.len() < offset + len {
                        data.resize(offset + len, 0);
                    }
                    data[offset..offset + len].fill(byte);
                    handle.write_at(offset as u64, &vec![byte; len]).unwrap();
                }
                Op::SetLen { stream, len } => {
                    let name = format!("s{}", stream);
                    if let Some(data) = model.get_mut(&name) {
                        data.resize(len as usize, 0);
                        root.open_stream(&name).unwrap().set_len(len as u64).unwrap();
                    }
                }
                Op::Delete { stream } => {
                    let name = format!("s{}", stream);
                    if model.remove(&name).is_some() {
                        root.delete(&name).unwrap();
                    } else {
                        prop_assert!(root.delete(&name).is_err());
                    }
                }
            }
        }

        let file = reopen(file);
        let names: Vec<String> = file.root().entries().unwrap().into_iter().map(|e| e.name).collect();
        prop_assert_eq!(names, model.keys().cloned().collect::<Vec<_>>());
        for (name, data) in &model {
            prop_assert_eq!(&contents(&file, name), data);
        }
    }

    #[test]
    fn prop_delete_releases_everything(sizes in prop::collection::vec(0usize..20_000, 1..8)) {
        let file = create();
        let root = file.root();

        // Warm up so the Mini-FAT and mini stream already exist
        root.create_stream("warm").unwrap().write_all(&[1u8; 10]).unwrap();
        let storage = root.create_storage("tmp").unwrap();
        for (i, size) in sizes.iter().enumerate() {
            storage.create_stream(&format!("f{}", i)).unwrap().write_all(&vec![i as u8; *size]).unwrap();
        }
        root.delete("tmp").unwrap();
        let len_after_first = file.len();

        // Same workload again fits in the released space
        let storage = root.create_storage("tmp").unwrap();
        for (i, size) in sizes.iter().enumerate() {
            storage.create_stream(&format!("f{}", i)).unwrap().write_all(&vec![i as u8; *size]).unwrap();
        }
        root.delete("tmp").unwrap();
        prop_assert_eq!(file.len(), len_after_first);
    }
}
