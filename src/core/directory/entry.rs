//! 128-byte directory records

use crate::error::{CfbError, Result};
use crate::header::{read_u16, read_u32, read_u64, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Size of one directory record
pub const DIRECTORY_ENTRY_SIZE: usize = 128;

/// Marks an absent sibling or child
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Name buffer size, terminator included
pub const MAX_NAME_BYTES: usize = 64;

/// FILETIME ticks (100 ns) between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

const OFFSET_NAME_LENGTH: usize = 0x40;
const OFFSET_TYPE: usize = 0x42;
const OFFSET_COLOR: usize = 0x43;
const OFFSET_LEFT: usize = 0x44;
const OFFSET_RIGHT: usize = 0x48;
const OFFSET_CHILD: usize = 0x4C;
const OFFSET_CLSID: usize = 0x50;
const OFFSET_STATE_BITS: usize = 0x60;
const OFFSET_CREATION_TIME: usize = 0x64;
const OFFSET_MODIFIED_TIME: usize = 0x6C;
const OFFSET_START_SECTOR: usize = 0x74;
const OFFSET_STREAM_LENGTH: usize = 0x78;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Unallocated = 0,
    Storage = 1,
    Stream = 2,
    Root = 5,
}

impl EntryType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EntryType::Unallocated),
            1 => Ok(EntryType::Storage),
            2 => Ok(EntryType::Stream),
            5 => Ok(EntryType::Root),
            other => Err(CfbError::corruption(format!(
                "unknown directory entry type {}",
                other
            ))),
        }
    }

    /// Root and storages own a child tree
    pub fn is_storage(self) -> bool {
        matches!(self, EntryType::Storage | EntryType::Root)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    Red = 0,
    Black = 1,
}

impl Color {
    pub fn from_u8(value: u8) -> Self {
        if value == 0 {
            Color::Red
        } else {
            Color::Black
        }
    }
}

/// One directory record
///
/// `id` is the record index and is not stored on disk. Timestamps are raw
/// FILETIME values; use the accessors for `chrono` conversions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: u32,
    pub name: String,
    pub entry_type: EntryType,
    pub color: Color,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub clsid: Uuid,
    pub state_bits: u32,
    pub creation_time: u64,
    pub modified_time: u64,
    /// First sector of the stream; for the root, of the mini stream
    pub start_sector: u32,
    pub stream_length: u64,
}

impl DirectoryEntry {
    /// An unallocated record
    pub fn new(id: u32) -> Self {
        DirectoryEntry {
            id,
            name: String::new(),
            entry_type: EntryType::Unallocated,
            color: Color::Red,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: Uuid::nil(),
            state_bits: 0,
            creation_time: 0,
            modified_time: 0,
            start_sector: 0,
            stream_length: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; DIRECTORY_ENTRY_SIZE] {
        let mut bytes = [0u8; DIRECTORY_ENTRY_SIZE];

        let units: Vec<u16> = self.name.encode_utf16().collect();
        let name_units = units.len().min(MAX_NAME_BYTES / 2 - 1);
        for (i, unit) in units[..name_units].iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        let name_length = if name_units == 0 {
            0
        } else {
            ((name_units + 1) * 2) as u16
        };

        bytes[OFFSET_NAME_LENGTH..OFFSET_NAME_LENGTH + 2].copy_from_slice(&name_length.to_le_bytes());
        bytes[OFFSET_TYPE] = self.entry_type as u8;
        bytes[OFFSET_COLOR] = self.color as u8;
        bytes[OFFSET_LEFT..OFFSET_LEFT + 4].copy_from_slice(&self.left.to_le_bytes());
        bytes[OFFSET_RIGHT..OFFSET_RIGHT + 4].copy_from_slice(&self.right.to_le_bytes());
        bytes[OFFSET_CHILD..OFFSET_CHILD + 4].copy_from_slice(&self.child.to_le_bytes());
        bytes[OFFSET_CLSID..OFFSET_CLSID + 16].copy_from_slice(&self.clsid.to_bytes_le());
        bytes[OFFSET_STATE_BITS..OFFSET_STATE_BITS + 4].copy_from_slice(&self.state_bits.to_le_bytes());
        bytes[OFFSET_CREATION_TIME..OFFSET_CREATION_TIME + 8]
            .copy_from_slice(&self.creation_time.to_le_bytes());
        bytes[OFFSET_MODIFIED_TIME..OFFSET_MODIFIED_TIME + 8]
            .copy_from_slice(&self.modified_time.to_le_bytes());
        bytes[OFFSET_START_SECTOR..OFFSET_START_SECTOR + 4]
            .copy_from_slice(&self.start_sector.to_le_bytes());
        bytes[OFFSET_STREAM_LENGTH..OFFSET_STREAM_LENGTH + 8]
            .copy_from_slice(&self.stream_length.to_le_bytes());

        bytes
    }

    /// Decode record `id`
    ///
    /// Version 3 files only define the low 32 bits of the stream length.
    pub fn from_bytes(id: u32, bytes: &[u8], version: Version) -> Result<Self> {
        if bytes.len() < DIRECTORY_ENTRY_SIZE {
            return Err(CfbError::corruption(format!(
                "directory record {} is truncated",
                id
            )));
        }

        let name_length = read_u16(bytes, OFFSET_NAME_LENGTH) as usize;
        let name_units = (name_length.min(MAX_NAME_BYTES) / 2).saturating_sub(1);
        let units: Vec<u16> = (0..name_units).map(|i| read_u16(bytes, i * 2)).collect();

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&bytes[OFFSET_CLSID..OFFSET_CLSID + 16]);

        let stream_length = match version {
            Version::V3 => read_u64(bytes, OFFSET_STREAM_LENGTH) & 0xFFFF_FFFF,
            Version::V4 => read_u64(bytes, OFFSET_STREAM_LENGTH),
        };

        Ok(DirectoryEntry {
            id,
            name: String::from_utf16_lossy(&units),
            entry_type: EntryType::from_u8(bytes[OFFSET_TYPE])?,
            color: Color::from_u8(bytes[OFFSET_COLOR]),
            left: read_u32(bytes, OFFSET_LEFT),
            right: read_u32(bytes, OFFSET_RIGHT),
            child: read_u32(bytes, OFFSET_CHILD),
            clsid: Uuid::from_bytes_le(clsid),
            state_bits: read_u32(bytes, OFFSET_STATE_BITS),
            creation_time: read_u64(bytes, OFFSET_CREATION_TIME),
            modified_time: read_u64(bytes, OFFSET_MODIFIED_TIME),
            start_sector: read_u32(bytes, OFFSET_START_SECTOR),
            stream_length,
        })
    }

    pub fn is_allocated(&self) -> bool {
        self.entry_type != EntryType::Unallocated
    }

    fn check_timestamp(&self, value: u64, field: &str) -> Result<()> {
        if value != 0 && matches!(self.entry_type, EntryType::Stream | EntryType::Root) {
            return Err(CfbError::InvalidTimestamp(format!(
                "{} must be zero for {:?} entries",
                field, self.entry_type
            )));
        }
        Ok(())
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.creation_time)
    }

    pub fn modified_time(&self) -> Option<DateTime<Utc>> {
        filetime_to_datetime(self.modified_time)
    }

    /// Set or clear the creation time; streams and the root only accept `None`
    pub fn set_creation_time(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        let value = time.map(datetime_to_filetime).transpose()?.unwrap_or(0);
        self.check_timestamp(value, "creation time")?;
        self.creation_time = value;
        Ok(())
    }

    /// Set or clear the modified time; streams and the root only accept `None`
    pub fn set_modified_time(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        let value = time.map(datetime_to_filetime).transpose()?.unwrap_or(0);
        self.check_timestamp(value, "modified time")?;
        self.modified_time = value;
        Ok(())
    }

    pub fn info(&self) -> EntryInfo {
        EntryInfo {
            name: self.name.clone(),
            entry_type: self.entry_type,
            length: self.stream_length,
            clsid: self.clsid,
            creation_time: self.creation_time(),
            modified_time: self.modified_time(),
        }
    }
}

/// Public description of a storage or stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub entry_type: EntryType,
    /// Stream length in bytes; 0 for storages, mini stream length for the root
    pub length: u64,
    pub clsid: Uuid,
    pub creation_time: Option<DateTime<Utc>>,
    pub modified_time: Option<DateTime<Utc>>,
}

/// Sibling order within one storage
///
/// Shorter UTF-16 names sort first; equal lengths compare by uppercased
/// characters, then ordinally so names differing only in case stay distinct.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let a_len = a.encode_utf16().count();
    let b_len = b.encode_utf16().count();

    a_len
        .cmp(&b_len)
        .then_with(|| {
            a.chars()
                .flat_map(char::to_uppercase)
                .cmp(b.chars().flat_map(char::to_uppercase))
        })
        .then_with(|| a.encode_utf16().cmp(b.encode_utf16()))
}

/// Convert a FILETIME; 0 means "not set"
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()? - FILETIME_UNIX_EPOCH;
    let seconds = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(seconds, nanos)
}

pub fn datetime_to_filetime(time: DateTime<Utc>) -> Result<u64> {
    let ticks = time
        .timestamp()
        .checked_mul(TICKS_PER_SECOND)
        .and_then(|t| t.checked_add(time.timestamp_subsec_nanos() as i64 / 100))
        .and_then(|t| t.checked_add(FILETIME_UNIX_EPOCH))
        .filter(|&t| t > 0)
        .ok_or_else(|| {
            CfbError::InvalidTimestamp(format!("{} is outside the FILETIME range", time))
        })?;
    Ok(ticks as u64)
}
