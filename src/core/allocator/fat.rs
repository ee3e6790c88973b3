//! File Allocation Table
//!
//! FAT sectors are located through the DIFAT: the first 109 in the header
//! array, the rest in DIFAT sectors. Each DIFAT sector holds
//! `sector_size / 4 - 1` FAT sector ids followed by the id of the next
//! DIFAT sector.

use super::{find_free_in, AllocationTable};
use crate::error::{CfbError, Result};
use crate::header::DIFAT_ARRAY_LENGTH;
use crate::io::IoContext;
use crate::sector::{
    ensure_valid_id, id_to_offset, is_valid_id, Sector, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT,
};
use tracing::debug;

/// View of the FAT borrowed from an [`IoContext`]
pub struct Fat<'a> {
    ctx: &'a mut IoContext,
}

impl<'a> Fat<'a> {
    pub fn new(ctx: &'a mut IoContext) -> Self {
        Fat { ctx }
    }

    fn entries_per_sector(&self) -> u32 {
        (self.ctx.sector_size() / 4) as u32
    }

    fn difat_entries_per_sector(&self) -> u32 {
        self.entries_per_sector() - 1
    }

    /// Number of entries covered by the current FAT sectors
    pub fn capacity(&self) -> u32 {
        self.ctx
            .header
            .fat_sector_count
            .saturating_mul(self.entries_per_sector())
    }

    /// File sector holding FAT sector number `index`, if it exists
    pub fn index_to_sector_id(&mut self, index: u32) -> Result<Option<u32>> {
        if index >= self.ctx.header.fat_sector_count {
            return Ok(None);
        }

        if (index as usize) < DIFAT_ARRAY_LENGTH {
            let id = self.ctx.header.difat[index as usize];
            return Ok(is_valid_id(id).then_some(id));
        }

        let per_sector = self.difat_entries_per_sector();
        let remaining = index - DIFAT_ARRAY_LENGTH as u32;
        let difat_sector = self.difat_sector(remaining / per_sector)?;
        let slot = (remaining % per_sector) as u64 * 4;

        let id = self
            .ctx
            .read_u32_at(id_to_offset(difat_sector, self.ctx.sector_size()) + slot)?;
        Ok(is_valid_id(id).then_some(id))
    }

    /// Id of the `n`th DIFAT sector
    fn difat_sector(&mut self, n: u32) -> Result<u32> {
        if n >= self.ctx.header.difat_sector_count {
            return Err(CfbError::corruption(format!(
                "DIFAT sector {} requested but the file has {}",
                n, self.ctx.header.difat_sector_count
            )));
        }

        let sector_size = self.ctx.sector_size();
        let link_offset = self.difat_entries_per_sector() as u64 * 4;
        let mut id = self.ctx.header.first_difat_sector;
        for _ in 0..n {
            if !is_valid_id(id) {
                return Err(CfbError::corruption(format!(
                    "DIFAT chain ends early at {:#x}",
                    id
                )));
            }
            id = self.ctx.read_u32_at(id_to_offset(id, sector_size) + link_offset)?;
        }

        if !is_valid_id(id) {
            return Err(CfbError::corruption(format!(
                "DIFAT chain ends early at {:#x}",
                id
            )));
        }
        Ok(id)
    }

    /// Ids of every FAT sector, in table order
    pub fn sector_ids(&mut self) -> Result<Vec<u32>> {
        let count = self.ctx.header.fat_sector_count;
        let mut ids = Vec::with_capacity(count as usize);
        ids.extend(
            self.ctx
                .header
                .difat
                .iter()
                .take((count as usize).min(DIFAT_ARRAY_LENGTH))
                .copied(),
        );

        if count as usize > DIFAT_ARRAY_LENGTH {
            let sector_size = self.ctx.sector_size();
            let per_sector = self.difat_entries_per_sector();
            let mut difat_sector = self.ctx.header.first_difat_sector;
            let mut bytes = vec![0u8; sector_size];

            while ids.len() < count as usize {
                if !is_valid_id(difat_sector) {
                    return Err(CfbError::corruption(format!(
                        "DIFAT lists {} of {} FAT sectors",
                        ids.len(),
                        count
                    )));
                }
                self.ctx
                    .read_at(id_to_offset(difat_sector, sector_size), &mut bytes)?;
                for slot in 0..per_sector as usize {
                    if ids.len() == count as usize {
                        break;
                    }
                    ids.push(crate::header::read_u32(&bytes, slot * 4));
                }
                difat_sector = crate::header::read_u32(&bytes, per_sector as usize * 4);
            }
        }

        if let Some(&bad) = ids.iter().find(|&&id| !is_valid_id(id)) {
            return Err(CfbError::corruption(format!(
                "DIFAT holds invalid FAT sector id {:#x}",
                bad
            )));
        }
        Ok(ids)
    }

    /// Byte offset of FAT entry `id`, if its FAT sector exists
    fn entry_position(&mut self, id: u32) -> Result<Option<u64>> {
        let per_sector = self.entries_per_sector();
        Ok(self
            .index_to_sector_id(id / per_sector)?
            .map(|sector| {
                id_to_offset(sector, self.ctx.sector_size()) + (id % per_sector) as u64 * 4
            }))
    }

    pub fn try_get(&mut self, id: u32) -> Result<Option<u32>> {
        match self.entry_position(id)? {
            Some(position) => Ok(Some(self.ctx.read_u32_at(position)?)),
            None => Ok(None),
        }
    }

    fn find_free(&mut self, start_hint: u32) -> Result<Option<u32>> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(None);
        }

        let sectors = self.sector_ids()?;
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

    /// Append one FAT sector, plus a DIFAT sector when every DIFAT slot is used
    fn grow(&mut self) -> Result<()> {
        let sector_size = self.ctx.sector_size();
        let fat_index = self.ctx.header.fat_sector_count;
        let difat_slots = DIFAT_ARRAY_LENGTH as u32
            + self.ctx.header.difat_sector_count * self.difat_entries_per_sector();

        // Every entry below capacity is in use, so the next sector is free
        let fat_sector = self.capacity();
        let difat_sector = (fat_index >= difat_slots).then_some(fat_sector + 1);
        ensure_valid_id(difat_sector.unwrap_or(fat_sector))?;

        self.ctx
            .write_at(id_to_offset(fat_sector, sector_size), &vec![0xFF; sector_size])?;

        if let Some(difat_sector) = difat_sector {
            let mut bytes = vec![0xFF; sector_size];
            bytes[sector_size - 4..].copy_from_slice(&ENDOFCHAIN.to_le_bytes());
            self.ctx
                .write_at(id_to_offset(difat_sector, sector_size), &bytes)?;

            if self.ctx.header.difat_sector_count == 0 {
                self.ctx.header.first_difat_sector = difat_sector;
            } else {
                let last = self.difat_sector(self.ctx.header.difat_sector_count - 1)?;
                let link = id_to_offset(last, sector_size) + (sector_size - 4) as u64;
                self.ctx.write_u32_at(link, difat_sector)?;
            }
            self.ctx.header.difat_sector_count += 1;
            debug!("Added DIFAT sector {}", difat_sector);
        }

        if (fat_index as usize) < DIFAT_ARRAY_LENGTH {
            self.ctx.header.difat[fat_index as usize] = fat_sector;
        } else {
            let per_sector = self.difat_entries_per_sector();
            let remaining = fat_index - DIFAT_ARRAY_LENGTH as u32;
            let holder = self.difat_sector(remaining / per_sector)?;
            let slot = (remaining % per_sector) as u64 * 4;
            self.ctx
                .write_u32_at(id_to_offset(holder, sector_size) + slot, fat_sector)?;
        }

        self.ctx.header.fat_sector_count += 1;
        self.ctx.mark_header_dirty();

        self.set(fat_sector, FATSECT)?;
        if let Some(difat_sector) = difat_sector {
            self.set(difat_sector, DIFSECT)?;
        }

        debug!(
            "Added FAT sector {} (FAT now {} sectors)",
            fat_sector, self.ctx.header.fat_sector_count
        );
        Ok(())
    }

    /// Count entries equal to `FREESECT`
    pub fn free_count(&mut self) -> Result<u32> {
        let sectors = self.sector_ids()?;
        let sector_size = self.ctx.sector_size();
        let mut bytes = vec![0u8; sector_size];
        let mut free = 0;
        for sector in sectors {
            self.ctx.read_at(id_to_offset(sector, sector_size), &mut bytes)?;
            free += bytes
                .chunks_exact(4)
                .filter(|entry| **entry == FREESECT.to_le_bytes())
                .count() as u32;
        }
        Ok(free)
    }
}

impl AllocationTable for Fat<'_> {
    fn sector_size(&self) -> usize {
        self.ctx.sector_size()
    }

    fn entry_count(&mut self) -> Result<u32> {
        Ok(self.capacity())
    }

    fn get(&mut self, id: u32) -> Result<u32> {
        self.try_get(id)?
            .ok_or_else(|| CfbError::corruption(format!("FAT entry {} not found", id)))
    }

    fn set(&mut self, id: u32, value: u32) -> Result<()> {
        let position = self
            .entry_position(id)?
            .ok_or_else(|| CfbError::corruption(format!("FAT entry {} not found", id)))?;
        self.ctx.write_u32_at(position, value)
    }

    fn add(&mut self, start_hint: u32) -> Result<u32> {
        self.ctx.ensure_writable()?;

        let id = match self.find_free(start_hint)? {
            Some(id) => id,
            None => {
                self.grow()?;
                self.find_free(start_hint)?.ok_or_else(|| {
                    CfbError::corruption("no free FAT entry after growing the table")
                })?
            }
        };
        ensure_valid_id(id)?;

        self.set(id, ENDOFCHAIN)?;
        let end = Sector::new(id, self.ctx.sector_size()).end_position();
        self.ctx.grow_to(end)?;

        debug!("Allocated sector {}", id);
        Ok(id)
    }

    fn sector_position(&mut self, id: u32) -> Result<u64> {
        ensure_valid_id(id)?;
        Ok(id_to_offset(id, self.ctx.sector_size()))
    }

    fn context(&mut self) -> &mut IoContext {
        self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Version;
    use crate::options::CompoundFileBuilder;
    use std::io::Cursor;

    fn context() -> IoContext {
        let options = CompoundFileBuilder::new().create().options();
        IoContext::new(Box::new(Cursor::new(Vec::new())), options).unwrap()
    }

    #[test]
    fn test_fresh_file_layout() {
        let mut ctx = context();
        let mut fat = ctx.fat();

        assert_eq!(fat.capacity(), 128);
        assert_eq!(fat.get(0).unwrap(), FATSECT);
        // Directory chain
        assert_eq!(fat.get(1).unwrap(), ENDOFCHAIN);
        assert_eq!(fat.get(2).unwrap(), FREESECT);
        assert_eq!(fat.free_count().unwrap(), 126);
    }

    #[test]
    fn test_add_marks_end_of_chain() {
        let mut ctx = context();
        let id = ctx.fat().add(ENDOFCHAIN).unwrap();
        assert_eq!(id, 2);
        assert_eq!(ctx.fat().get(id).unwrap(), ENDOFCHAIN);
        assert_eq!(ctx.len(), 4 * 512);
    }

    #[test]
    fn test_add_probes_after_hint() {
        let mut ctx = context();
        let mut fat = ctx.fat();
        let ids: Vec<u32> = (0..6).map(|_| fat.add(ENDOFCHAIN).unwrap()).collect();
        assert_eq!(ids, vec![2, 3, 4, 5, 6, 7]);

        fat.set(3, FREESECT).unwrap();
        fat.set(6, FREESECT).unwrap();

        // Forward from the hint first, then wrap around
        assert_eq!(fat.add(4).unwrap(), 6);
        assert_eq!(fat.add(127).unwrap(), 3);
    }

    #[test]
    fn test_missing_entry_is_corruption() {
        let mut ctx = context();
        let mut fat = ctx.fat();
        assert_eq!(fat.try_get(5000).unwrap(), None);
        assert!(matches!(
            fat.get(5000),
            Err(CfbError::ChainCorruption(_))
        ));
        assert!(matches!(
            fat.set(5000, 1),
            Err(CfbError::ChainCorruption(_))
        ));
    }

    #[test]
    fn test_grow_adds_fat_sector() {
        let mut ctx = context();
        {
            let mut fat = ctx.fat();
            for _ in 0..126 {
                fat.add(ENDOFCHAIN).unwrap();
            }
            assert_eq!(fat.free_count().unwrap(), 0);

            let id = fat.add(ENDOFCHAIN).unwrap();
            // The new FAT sector takes 128, the allocation lands after it
            assert_eq!(id, 129);
            assert_eq!(fat.get(128).unwrap(), FATSECT);
            assert_eq!(fat.capacity(), 256);
        }
        assert_eq!(ctx.header.fat_sector_count, 2);
        assert_eq!(ctx.header.difat[1], 128);
    }

    #[test]
    fn test_grow_beyond_header_difat() {
        let options = CompoundFileBuilder::new()
            .create()
            .version(Version::V3)
            .options();
        let mut ctx = IoContext::new(Box::new(Cursor::new(Vec::new())), options).unwrap();

        // Fill 109 FAT sectors worth of entries, then one more
        let total = 109 * 128 + 1;
        {
            let mut fat = ctx.fat();
            let mut last = ENDOFCHAIN;
            while fat.capacity() < total {
                last = fat.add(last).unwrap();
            }
        }

        assert_eq!(ctx.header.fat_sector_count, 110);
        assert_eq!(ctx.header.difat_sector_count, 1);
        assert!(is_valid_id(ctx.header.first_difat_sector));

        let difat_sector = ctx.header.first_difat_sector;
        let mut fat = ctx.fat();
        assert_eq!(fat.get(difat_sector).unwrap(), DIFSECT);

        let fat_sector = fat.index_to_sector_id(109).unwrap().unwrap();
        assert_eq!(fat.get(fat_sector).unwrap(), FATSECT);
        assert_eq!(fat.sector_ids().unwrap().len(), 110);
        assert_eq!(fat.sector_ids().unwrap()[109], fat_sector);
    }
}
