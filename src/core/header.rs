use crate::error::{CfbError, Result};
use crate::sector::{ENDOFCHAIN, FREESECT};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const MINOR_VERSION: u16 = 0x003E;
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;
pub const MINI_SECTOR_SHIFT: u16 = 6;
pub const MINI_STREAM_CUTOFF_SIZE: u32 = 4096;

/// The header structure is always 512 bytes, independent of sector size
pub const HEADER_SIZE: usize = 512;

/// Number of FAT sector ids stored inline in the header
pub const DIFAT_ARRAY_LENGTH: usize = 109;

const OFFSET_CLSID: usize = 0x08;
const OFFSET_MINOR_VERSION: usize = 0x18;
const OFFSET_MAJOR_VERSION: usize = 0x1A;
const OFFSET_BYTE_ORDER: usize = 0x1C;
const OFFSET_SECTOR_SHIFT: usize = 0x1E;
const OFFSET_MINI_SECTOR_SHIFT: usize = 0x20;
const OFFSET_DIRECTORY_SECTOR_COUNT: usize = 0x28;
const OFFSET_FAT_SECTOR_COUNT: usize = 0x2C;
const OFFSET_FIRST_DIRECTORY_SECTOR: usize = 0x30;
const OFFSET_TRANSACTION_SIGNATURE: usize = 0x34;
const OFFSET_MINI_STREAM_CUTOFF: usize = 0x38;
const OFFSET_FIRST_MINI_FAT_SECTOR: usize = 0x3C;
const OFFSET_MINI_FAT_SECTOR_COUNT: usize = 0x40;
const OFFSET_FIRST_DIFAT_SECTOR: usize = 0x44;
const OFFSET_DIFAT_SECTOR_COUNT: usize = 0x48;
const OFFSET_DIFAT: usize = 0x4C;

/// Major format version
///
/// The major version fixes the sector size for the life of the file.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Version {
    /// 512-byte sectors
    #[default]
    V3 = 3,
    /// 4096-byte sectors
    V4 = 4,
}

impl Version {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            3 => Some(Version::V3),
            4 => Some(Version::V4),
            _ => None,
        }
    }

    pub fn sector_shift(self) -> u16 {
        match self {
            Version::V3 => 9,
            Version::V4 => 12,
        }
    }

    pub fn sector_size(self) -> usize {
        1 << self.sector_shift()
    }
}

/// Compound file header
///
/// Occupies the first 512 bytes of the file. For version 4 files the rest of
/// the first 4096-byte sector is zero padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub clsid: Uuid,
    pub minor_version: u16,
    pub version: Version,
    /// Always 0 for version 3 files
    pub directory_sector_count: u32,
    pub fat_sector_count: u32,
    pub first_directory_sector: u32,
    pub first_mini_fat_sector: u32,
    pub mini_fat_sector_count: u32,
    pub first_difat_sector: u32,
    pub difat_sector_count: u32,
    pub difat: [u32; DIFAT_ARRAY_LENGTH],
}

impl Header {
    /// Create the header of an empty file
    pub fn new(version: Version) -> Self {
        Header {
            clsid: Uuid::nil(),
            minor_version: MINOR_VERSION,
            version,
            directory_sector_count: 0,
            fat_sector_count: 0,
            first_directory_sector: ENDOFCHAIN,
            first_mini_fat_sector: ENDOFCHAIN,
            mini_fat_sector_count: 0,
            first_difat_sector: ENDOFCHAIN,
            difat_sector_count: 0,
            difat: [FREESECT; DIFAT_ARRAY_LENGTH],
        }
    }

    pub fn sector_shift(&self) -> u16 {
        self.version.sector_shift()
    }

    pub fn sector_size(&self) -> usize {
        self.version.sector_size()
    }

    pub fn mini_sector_size(&self) -> usize {
        1 << MINI_SECTOR_SHIFT
    }

    /// Serialize header to bytes (always 512)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&SIGNATURE);
        bytes.extend_from_slice(&self.clsid.to_bytes_le());
        bytes.extend_from_slice(&self.minor_version.to_le_bytes());
        bytes.extend_from_slice(&(self.version as u16).to_le_bytes());
        bytes.extend_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
        bytes.extend_from_slice(&self.sector_shift().to_le_bytes());
        bytes.extend_from_slice(&MINI_SECTOR_SHIFT.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        let directory_sector_count = match self.version {
            Version::V3 => 0,
            Version::V4 => self.directory_sector_count,
        };
        bytes.extend_from_slice(&directory_sector_count.to_le_bytes());
        bytes.extend_from_slice(&self.fat_sector_count.to_le_bytes());
        bytes.extend_from_slice(&self.first_directory_sector.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&MINI_STREAM_CUTOFF_SIZE.to_le_bytes());
        bytes.extend_from_slice(&self.first_mini_fat_sector.to_le_bytes());
        bytes.extend_from_slice(&self.mini_fat_sector_count.to_le_bytes());
        bytes.extend_from_slice(&self.first_difat_sector.to_le_bytes());
        bytes.extend_from_slice(&self.difat_sector_count.to_le_bytes());
        for id in &self.difat {
            bytes.extend_from_slice(&id.to_le_bytes());
        }

        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CfbError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        if bytes[..8] != SIGNATURE {
            return Err(CfbError::InvalidSignature);
        }

        let minor_version = read_u16(bytes, OFFSET_MINOR_VERSION);
        let major_version = read_u16(bytes, OFFSET_MAJOR_VERSION);
        let version =
            Version::from_u16(major_version).ok_or(CfbError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            })?;

        if read_u16(bytes, OFFSET_BYTE_ORDER) != BYTE_ORDER_MARK {
            return Err(CfbError::HeaderCorrupt("invalid byte order mark".into()));
        }

        let sector_shift = read_u16(bytes, OFFSET_SECTOR_SHIFT);
        if sector_shift != version.sector_shift() {
            return Err(CfbError::HeaderCorrupt(format!(
                "sector shift {} does not match major version {}",
                sector_shift, major_version
            )));
        }

        let mini_sector_shift = read_u16(bytes, OFFSET_MINI_SECTOR_SHIFT);
        if mini_sector_shift != MINI_SECTOR_SHIFT {
            return Err(CfbError::HeaderCorrupt(format!(
                "unsupported mini sector shift {}",
                mini_sector_shift
            )));
        }

        let cutoff = read_u32(bytes, OFFSET_MINI_STREAM_CUTOFF);
        if cutoff != MINI_STREAM_CUTOFF_SIZE {
            return Err(CfbError::HeaderCorrupt(format!(
                "unsupported mini stream cutoff {}",
                cutoff
            )));
        }

        if read_u32(bytes, OFFSET_TRANSACTION_SIGNATURE) != 0 {
            tracing::warn!("Ignoring non-zero transaction signature");
        }

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&bytes[OFFSET_CLSID..OFFSET_CLSID + 16]);

        let mut difat = [FREESECT; DIFAT_ARRAY_LENGTH];
        for (i, slot) in difat.iter_mut().enumerate() {
            *slot = read_u32(bytes, OFFSET_DIFAT + i * 4);
        }

        let header = Header {
            clsid: Uuid::from_bytes_le(clsid),
            minor_version,
            version,
            directory_sector_count: read_u32(bytes, OFFSET_DIRECTORY_SECTOR_COUNT),
            fat_sector_count: read_u32(bytes, OFFSET_FAT_SECTOR_COUNT),
            first_directory_sector: read_u32(bytes, OFFSET_FIRST_DIRECTORY_SECTOR),
            first_mini_fat_sector: read_u32(bytes, OFFSET_FIRST_MINI_FAT_SECTOR),
            mini_fat_sector_count: read_u32(bytes, OFFSET_MINI_FAT_SECTOR_COUNT),
            first_difat_sector: read_u32(bytes, OFFSET_FIRST_DIFAT_SECTOR),
            difat_sector_count: read_u32(bytes, OFFSET_DIFAT_SECTOR_COUNT),
            difat,
        };

        header.validate()?;

        Ok(header)
    }

    /// Check counts that can be verified without touching the sectors
    pub fn validate(&self) -> Result<()> {
        let inline_fat_sectors = self
            .difat
            .iter()
            .take_while(|&&id| id != FREESECT)
            .count() as u32;

        if self.difat_sector_count == 0 && inline_fat_sectors < self.fat_sector_count {
            return Err(CfbError::HeaderCorrupt(format!(
                "FAT sector count {} exceeds inline DIFAT entries {}",
                self.fat_sector_count, inline_fat_sectors
            )));
        }

        if self.difat_sector_count == 0 && self.first_difat_sector != ENDOFCHAIN {
            tracing::warn!(
                "Header names DIFAT sector {:#x} but DIFAT count is 0",
                self.first_difat_sector
            );
        }

        Ok(())
    }
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
