//! Mini-FAT and mini stream
//!
//! Mini-FAT table sectors form a regular FAT chain starting at the header's
//! first Mini-FAT sector. The mini sectors themselves live in the mini
//! stream, the FAT chain rooted at the root entry, so mini sector `n` sits at
//! byte `n * 64` of that stream.

use super::chain::ChainCursor;
use super::{find_free_in, AllocationTable};
use crate::error::{CfbError, Result};
use crate::io::IoContext;
use crate::sector::{id_to_offset, sectors_for_length, ENDOFCHAIN, MINI_SECTOR_SIZE};
use tracing::debug;

/// View of the Mini-FAT borrowed from an [`IoContext`]
pub struct MiniFat<'a> {
    ctx: &'a mut IoContext,
}

impl<'a> MiniFat<'a> {
    pub fn new(ctx: &'a mut IoContext) -> Self {
        MiniFat { ctx }
    }

    fn entries_per_sector(&self) -> u32 {
        (self.ctx.sector_size() / 4) as u32
    }

    /// File sectors holding the Mini-FAT, in table order
    pub fn sector_ids(&mut self) -> Result<Vec<u32>> {
        let start = self.ctx.header.first_mini_fat_sector;
        let mut fat = self.ctx.fat();
        ChainCursor::new(&mut fat, start).collect_ids()
    }

    fn entry_position(&mut self, id: u32) -> Result<Option<u64>> {
        let per_sector = self.entries_per_sector();
        let start = self.ctx.header.first_mini_fat_sector;
        let sector_size = self.ctx.sector_size();

        let mut fat = self.ctx.fat();
        let mut cursor = ChainCursor::new(&mut fat, start);
        if !cursor.move_to(id / per_sector)? {
            return Ok(None);
        }
        Ok(cursor
            .current()
            .map(|sector| id_to_offset(sector, sector_size) + (id % per_sector) as u64 * 4))
    }

    pub fn try_get(&mut self, id: u32) -> Result<Option<u32>> {
        match self.entry_position(id)? {
            Some(position) => Ok(Some(self.ctx.read_u32_at(position)?)),
            None => Ok(None),
        }
    }

    fn find_free(&mut self, start_hint: u32) -> Result<Option<u32>> {
        let sectors = self.sector_ids()?;
        let capacity = sectors.len() as u32 * self.entries_per_sector();
        if capacity == 0 {
            return Ok(None);
        }

        let start = if start_hint < capacity {
            start_hint + 1
        } else {
            0
        };
        if let Some(id) = find_free_in(self.ctx, &sectors, start, capacity)? {
            return Ok(Some(id));
        }
        find_free_in(self.ctx, &sectors, 0, start.min(capacity))
    }

    /// Append one table sector initialised to `FREESECT`
    fn grow(&mut self) -> Result<()> {
        let sector_size = self.ctx.sector_size();
        let start = self.ctx.header.first_mini_fat_sector;

        let (sector, start) = {
            let mut fat = self.ctx.fat();
            let mut cursor = ChainCursor::new(&mut fat, start);
            let sector = cursor.extend()?;
            (sector, cursor.start())
        };

        self.ctx
            .write_at(id_to_offset(sector, sector_size), &vec![0xFF; sector_size])?;
        self.ctx.header.first_mini_fat_sector = start;
        self.ctx.header.mini_fat_sector_count += 1;
        self.ctx.mark_header_dirty();

        debug!(
            "Added Mini-FAT sector {} ({} total)",
            sector, self.ctx.header.mini_fat_sector_count
        );
        Ok(())
    }

    /// Extend the mini stream so it covers `length` bytes
    fn ensure_mini_stream(&mut self, length: u64) -> Result<()> {
        let mut root = self.ctx.root_entry()?;
        if root.stream_length >= length {
            return Ok(());
        }

        let sector_size = self.ctx.sector_size();
        let start = {
            let mut fat = self.ctx.fat();
            let mut cursor = ChainCursor::new(&mut fat, root.start_sector);
            let needed = sectors_for_length(length, sector_size);
            if cursor.count()? < needed {
                cursor.resize(needed)?;
            }
            cursor.start()
        };

        root.start_sector = start;
        root.stream_length = length;
        self.ctx.directories().write(&root)?;
        debug!("Mini stream now {} bytes", length);
        Ok(())
    }
}

impl AllocationTable for MiniFat<'_> {
    fn sector_size(&self) -> usize {
        MINI_SECTOR_SIZE
    }

    fn entry_count(&mut self) -> Result<u32> {
        Ok(self
            .ctx
            .header
            .mini_fat_sector_count
            .saturating_mul(self.entries_per_sector()))
    }

    fn get(&mut self, id: u32) -> Result<u32> {
        self.try_get(id)?
            .ok_or_else(|| CfbError::corruption(format!("Mini-FAT entry {} not found", id)))
    }

    fn set(&mut self, id: u32, value: u32) -> Result<()> {
        let position = self
            .entry_position(id)?
            .ok_or_else(|| CfbError::corruption(format!("Mini-FAT entry {} not found", id)))?;
        self.ctx.write_u32_at(position, value)
    }

    fn add(&mut self, start_hint: u32) -> Result<u32> {
        self.ctx.ensure_writable()?;

        let id = match self.find_free(start_hint)? {
            Some(id) => id,
            None => {
                self.grow()?;
                self.find_free(start_hint)?.ok_or_else(|| {
                    CfbError::corruption("no free Mini-FAT entry after growing the table")
                })?
            }
        };

        self.set(id, ENDOFCHAIN)?;
        self.ensure_mini_stream((id as u64 + 1) * MINI_SECTOR_SIZE as u64)?;

        debug!("Allocated mini sector {}", id);
        Ok(id)
    }

    fn sector_position(&mut self, id: u32) -> Result<u64> {
        let sector_size = self.ctx.sector_size();
        let offset = id as u64 * MINI_SECTOR_SIZE as u64;
        let root = self.ctx.root_entry()?;
        if offset >= root.stream_length {
            return Err(CfbError::corruption(format!(
                "mini sector {} lies beyond the {} byte mini stream",
                id, root.stream_length
            )));
        }

        let mut fat = self.ctx.fat();
        let mut cursor = ChainCursor::new(&mut fat, root.start_sector);
        if !cursor.move_to((offset / sector_size as u64) as u32)? {
            return Err(CfbError::corruption(format!(
                "mini stream chain is shorter than its length {}",
                root.stream_length
            )));
        }
        let sector = cursor
            .current()
            .ok_or_else(|| CfbError::corruption("mini stream cursor lost its sector"))?;

        Ok(id_to_offset(sector, sector_size) + offset % sector_size as u64)
    }

    fn context(&mut self) -> &mut IoContext {
        self.ctx
    }
}
