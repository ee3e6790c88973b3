//! Directory record pool
//!
//! Records live in a FAT chain starting at the header's first directory
//! sector and are addressed by absolute index. Unallocated records are kept
//! in a free list on the context, rebuilt by scanning whenever it is missing.

pub mod entry;
pub mod tree;

pub use entry::{Color, DirectoryEntry, EntryInfo, EntryType, DIRECTORY_ENTRY_SIZE, NOSTREAM};
pub use tree::DirectoryTree;

use crate::allocator::chain::ChainCursor;
use crate::error::{CfbError, Result};
use crate::io::IoContext;
use crate::sector::id_to_offset;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// View of the directory records borrowed from an [`IoContext`]
pub struct Directories<'a> {
    ctx: &'a mut IoContext,
}

impl<'a> Directories<'a> {
    pub fn new(ctx: &'a mut IoContext) -> Self {
        Directories { ctx }
    }

    fn entries_per_sector(&self) -> u32 {
        (self.ctx.sector_size() / DIRECTORY_ENTRY_SIZE) as u32
    }

    fn sector_ids(&mut self) -> Result<Vec<u32>> {
        let start = self.ctx.header.first_directory_sector;
        let mut fat = self.ctx.fat();
        ChainCursor::new(&mut fat, start).collect_ids()
    }

    /// Number of record slots, allocated or not
    pub fn capacity(&mut self) -> Result<u32> {
        Ok(self.sector_ids()?.len() as u32 * self.entries_per_sector())
    }

    fn position(&mut self, id: u32) -> Result<Option<u64>> {
        let per_sector = self.entries_per_sector();
        let start = self.ctx.header.first_directory_sector;
        let sector_size = self.ctx.sector_size();

        let mut fat = self.ctx.fat();
        let mut cursor = ChainCursor::new(&mut fat, start);
        if !cursor.move_to(id / per_sector)? {
            return Ok(None);
        }
        Ok(cursor.current().map(|sector| {
            id_to_offset(sector, sector_size) + ((id % per_sector) as usize * DIRECTORY_ENTRY_SIZE) as u64
        }))
    }

    /// Read record `id` whatever its type
    pub fn get_raw(&mut self, id: u32) -> Result<DirectoryEntry> {
        let position = self
            .position(id)?
            .ok_or_else(|| CfbError::EntryNotFound(format!("directory entry {}", id)))?;
        let mut bytes = [0u8; DIRECTORY_ENTRY_SIZE];
        self.ctx.read_at(position, &mut bytes)?;
        DirectoryEntry::from_bytes(id, &bytes, self.ctx.header.version)
    }

    /// Read allocated record `id`
    pub fn get(&mut self, id: u32) -> Result<DirectoryEntry> {
        let entry = self.get_raw(id)?;
        if !entry.is_allocated() {
            return Err(CfbError::EntryNotFound(format!(
                "directory entry {} is unallocated",
                id
            )));
        }
        Ok(entry)
    }

    /// Read allocated record `id` if it still holds the entry a handle
    /// stamped with `generation` was opened on
    pub fn get_live(&mut self, id: u32, generation: u64) -> Result<DirectoryEntry> {
        if self.ctx.generation(id) != generation {
            return Err(CfbError::EntryNotFound(format!(
                "directory entry {} was deleted",
                id
            )));
        }
        self.get(id)
    }

    pub fn write(&mut self, entry: &DirectoryEntry) -> Result<()> {
        let position = self
            .position(entry.id)?
            .ok_or_else(|| CfbError::EntryNotFound(format!("directory entry {}", entry.id)))?;
        self.ctx.write_at(position, &entry.to_bytes())
    }

    fn ensure_free_list(&mut self) -> Result<()> {
        if self.ctx.free_entries.is_some() {
            return Ok(());
        }

        let sector_size = self.ctx.sector_size();
        let per_sector = self.entries_per_sector();
        let version = self.ctx.header.version;
        let mut free = BTreeSet::new();
        let mut bytes = vec![0u8; sector_size];

        for (index, sector) in self.sector_ids()?.into_iter().enumerate() {
            self.ctx.read_at(id_to_offset(sector, sector_size), &mut bytes)?;
            for (slot, record) in bytes.chunks_exact(DIRECTORY_ENTRY_SIZE).enumerate() {
                let id = index as u32 * per_sector + slot as u32;
                if !DirectoryEntry::from_bytes(id, record, version)?.is_allocated() {
                    free.insert(id);
                }
            }
        }

        debug!("Rebuilt directory free list: {} free records", free.len());
        self.ctx.free_entries = Some(free);
        Ok(())
    }

    /// Take the lowest free record, growing the directory by a sector if
    /// none is left
    ///
    /// The returned record is blank and not yet written.
    pub fn create_or_recycle(&mut self) -> Result<DirectoryEntry> {
        self.ctx.ensure_writable()?;
        self.ensure_free_list()?;

        let recycled = self
            .ctx
            .free_entries
            .as_mut()
            .and_then(|free| free.pop_first());

        let id = match recycled {
            Some(id) => id,
            None => self.grow()?,
        };
        self.ctx.stamp_generation(id);
        Ok(DirectoryEntry::new(id))
    }

    /// Give back a record taken by `create_or_recycle` that was never linked
    pub fn release(&mut self, id: u32) {
        if let Err(err) = self.write(&DirectoryEntry::new(id)) {
            warn!("Failed to blank released directory entry {}: {}", id, err);
        }
        if let Some(free) = self.ctx.free_entries.as_mut() {
            free.insert(id);
        }
    }

    /// Append a sector of unallocated records; returns the first new index
    fn grow(&mut self) -> Result<u32> {
        let sector_size = self.ctx.sector_size();
        let per_sector = self.entries_per_sector();
        let start = self.ctx.header.first_directory_sector;

        let (sector, start, index) = {
            let mut fat = self.ctx.fat();
            let mut cursor = ChainCursor::new(&mut fat, start);
            let sector = cursor.extend()?;
            let index = cursor.index().unwrap_or(0);
            (sector, cursor.start(), index)
        };

        let blank = DirectoryEntry::new(0).to_bytes();
        let records: Vec<u8> = blank
            .iter()
            .copied()
            .cycle()
            .take(sector_size)
            .collect();
        self.ctx
            .write_at(id_to_offset(sector, sector_size), &records)?;

        self.ctx.header.first_directory_sector = start;
        self.ctx.header.directory_sector_count += 1;
        self.ctx.mark_header_dirty();

        let first = index * per_sector;
        if let Some(free) = self.ctx.free_entries.as_mut() {
            free.extend(first + 1..first + per_sector);
        }

        debug!(
            "Grew directory with sector {} (records {}..{})",
            sector,
            first,
            first + per_sector
        );
        Ok(first)
    }

    /// Blank record `id` and return it to the free list
    pub fn recycle(&mut self, id: u32) -> Result<()> {
        self.write(&DirectoryEntry::new(id))?;
        if let Some(free) = self.ctx.free_entries.as_mut() {
            free.insert(id);
        }
        debug!("Recycled directory entry {}", id);
        Ok(())
    }
}
