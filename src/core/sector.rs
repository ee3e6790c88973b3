//! Sector addressing
//!
//! Sectors are not materialised as objects: a sector is its id, and its
//! position in the file is derived from the sector shift. The header occupies
//! the first sector-sized slot, so sector `n` starts at `(n + 1) << shift`.

use crate::error::{CfbError, Result};

/// Largest id that can address a real sector.
pub const MAXREGSECT: u32 = 0xFFFF_FFFA;
/// Marks a DIFAT sector in the FAT.
pub const DIFSECT: u32 = 0xFFFF_FFFC;
/// Marks a FAT sector in the FAT.
pub const FATSECT: u32 = 0xFFFF_FFFD;
/// Terminates a chain.
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
/// Unallocated sector.
pub const FREESECT: u32 = 0xFFFF_FFFF;

/// Size of a mini sector in bytes (mini sector shift 6).
pub const MINI_SECTOR_SIZE: usize = 64;

/// Logical view of one sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector {
    pub id: u32,
    pub position: u64,
    pub length: usize,
}

impl Sector {
    pub fn new(id: u32, sector_size: usize) -> Self {
        Sector {
            id,
            position: id_to_offset(id, sector_size),
            length: sector_size,
        }
    }

    /// Byte offset one past the end of the sector
    pub fn end_position(&self) -> u64 {
        self.position + self.length as u64
    }
}

/// Byte offset of a regular sector
pub fn id_to_offset(id: u32, sector_size: usize) -> u64 {
    (id as u64 + 1) * sector_size as u64
}

/// True when `id` can address a real sector
pub fn is_valid_id(id: u32) -> bool {
    id <= MAXREGSECT
}

/// Fail with `InvalidSectorId` unless `id` addresses a real sector
pub fn ensure_valid_id(id: u32) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(CfbError::InvalidSectorId(id))
    }
}

/// True for the ids an empty chain may start with
pub fn is_end_of_chain(id: u32) -> bool {
    id == ENDOFCHAIN || id == FREESECT
}

/// Number of `unit`-sized sectors needed to hold `length` bytes
pub fn sectors_for_length(length: u64, unit: usize) -> u32 {
    length.div_ceil(unit as u64) as u32
}
