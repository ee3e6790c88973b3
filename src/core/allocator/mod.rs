//! Sector allocation tables
//!
//! Two tables share one contract:
//! - The FAT maps every regular sector to the next sector of its chain
//! - The Mini-FAT does the same for 64-byte mini sectors inside the mini stream
//!
//! Chains are walked with [`chain::ChainCursor`], which works over either.

pub mod chain;
pub mod fat;
pub mod mini_fat;

use crate::error::Result;
use crate::io::IoContext;

/// Allocation table trait
///
/// Entries are addressed by absolute sector id. Each entry holds the next id
/// of its chain or one of the sentinels in [`crate::sector`].
pub trait AllocationTable {
    /// Size of one allocation unit in bytes
    fn sector_size(&self) -> usize;

    /// Number of entries the table can address without growing
    fn entry_count(&mut self) -> Result<u32>;

    /// Read entry `id`
    ///
    /// Fails with `ChainCorruption` when the table sector holding `id` does
    /// not exist.
    fn get(&mut self, id: u32) -> Result<u32>;

    /// Overwrite entry `id`
    fn set(&mut self, id: u32, value: u32) -> Result<()>;

    /// Allocate a free entry, searching after `start_hint` first
    ///
    /// The new entry is marked `ENDOFCHAIN`. Grows the table when every
    /// entry is in use.
    fn add(&mut self, start_hint: u32) -> Result<u32>;

    /// Byte offset of sector `id` in the file
    fn sector_position(&mut self, id: u32) -> Result<u64>;

    fn context(&mut self) -> &mut IoContext;

    /// Read from sector `id` starting `offset` bytes in
    fn read_sector(&mut self, id: u32, offset: usize, buf: &mut [u8]) -> Result<()> {
        let position = self.sector_position(id)?;
        self.context().read_at(position + offset as u64, buf)
    }

    /// Write into sector `id` starting `offset` bytes in
    fn write_sector(&mut self, id: u32, offset: usize, data: &[u8]) -> Result<()> {
        let position = self.sector_position(id)?;
        self.context().write_at(position + offset as u64, data)
    }
}

/// Scan a run of table sectors for a `FREESECT` entry in `[from, to)`
///
/// `sector_ids[k]` is the file sector holding entries `k * per_sector ..`.
pub(crate) fn find_free_in(
    context: &mut IoContext,
    sector_ids: &[u32],
    from: u32,
    to: u32,
) -> Result<Option<u32>> {
    use crate::sector::{id_to_offset, FREESECT};

    let sector_size = context.sector_size();
    let per_sector = (sector_size / 4) as u32;
    let mut bytes = vec![0u8; sector_size];
    let mut id = from;

    while id < to {
        let index = (id / per_sector) as usize;
        let Some(&sector_id) = sector_ids.get(index) else {
            break;
        };
        context.read_at(id_to_offset(sector_id, sector_size), &mut bytes)?;

        let end = ((index as u32 + 1) * per_sector).min(to);
        for candidate in id..end {
            let slot = ((candidate % per_sector) * 4) as usize;
            let value = u32::from_le_bytes([
                bytes[slot],
                bytes[slot + 1],
                bytes[slot + 2],
                bytes[slot + 3],
            ]);
            if value == FREESECT {
                return Ok(Some(candidate));
            }
        }
        id = end;
    }

    Ok(None)
}
