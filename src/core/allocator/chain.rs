//! Chain traversal
//!
//! A chain is a singly linked list threaded through an allocation table.
//! There are no back links, so moving backwards restarts from the head.

use super::AllocationTable;
use crate::error::{CfbError, Result};
use crate::sector::{is_end_of_chain, is_valid_id, ENDOFCHAIN, FREESECT};
use tracing::debug;

/// Cursor over one chain of an allocation table
///
/// Holds the table mutably for its lifetime; dropping the cursor releases it.
pub struct ChainCursor<'t, T: AllocationTable + ?Sized> {
    table: &'t mut T,
    start: u32,
    /// Position of `current` within the chain, `None` before the first move
    index: Option<u32>,
    current: u32,
}

impl<'t, T: AllocationTable + ?Sized> ChainCursor<'t, T> {
    pub fn new(table: &'t mut T, start: u32) -> Self {
        ChainCursor {
            table,
            start,
            index: None,
            current: ENDOFCHAIN,
        }
    }

    /// First sector of the chain, `ENDOFCHAIN` when empty
    pub fn start(&self) -> u32 {
        if is_end_of_chain(self.start) {
            ENDOFCHAIN
        } else {
            self.start
        }
    }

    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn current(&self) -> Option<u32> {
        self.index.map(|_| self.current)
    }

    pub fn reset(&mut self) {
        self.index = None;
        self.current = ENDOFCHAIN;
    }

    /// Advance one link; returns `false` (staying put) at the end of the chain
    pub fn move_next(&mut self) -> Result<bool> {
        let next = match self.index {
            None => self.start,
            Some(_) => self.table.get(self.current)?,
        };

        if is_end_of_chain(next) {
            return Ok(false);
        }
        if !is_valid_id(next) {
            return Err(CfbError::corruption(format!(
                "chain through {:#x} links to reserved id {:#x}",
                self.current, next
            )));
        }

        let index = self.index.map_or(0, |i| i + 1);
        if index >= self.table.entry_count()? {
            return Err(CfbError::corruption(format!(
                "chain starting at {} is longer than its table (cycle?)",
                self.start
            )));
        }

        self.index = Some(index);
        self.current = next;
        Ok(true)
    }

    /// Move to the `n`th sector of the chain; `false` when the chain is shorter
    pub fn move_to(&mut self, n: u32) -> Result<bool> {
        if matches!(self.index, Some(i) if i > n) {
            self.reset();
        }

        while self.index != Some(n) {
            if !self.move_next()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Number of sectors in the chain; leaves the cursor on the tail
    pub fn count(&mut self) -> Result<u32> {
        self.reset();
        while self.move_next()? {}
        Ok(self.index.map_or(0, |i| i + 1))
    }

    /// Append one sector to the chain and return its id
    pub fn extend(&mut self) -> Result<u32> {
        self.count()?;
        self.append()
    }

    /// Append assuming the cursor sits on the tail
    fn append(&mut self) -> Result<u32> {
        let id = match self.index {
            None => {
                let id = self.table.add(ENDOFCHAIN)?;
                self.start = id;
                self.index = Some(0);
                id
            }
            Some(index) => {
                let tail = self.current;
                let id = self.table.add(tail)?;
                self.table.set(tail, id)?;
                self.index = Some(index + 1);
                id
            }
        };
        self.current = id;
        Ok(id)
    }

    /// Grow or shrink the chain to exactly `target` sectors
    pub fn resize(&mut self, target: u32) -> Result<()> {
        let count = self.count()?;
        if target < count {
            return self.shrink(target);
        }
        for _ in count..target {
            self.append()?;
        }
        if target > count {
            debug!(
                "Extended chain at {} from {} to {} sectors",
                self.start(),
                count,
                target
            );
        }
        Ok(())
    }

    /// Truncate the chain to `n` sectors, freeing the rest
    ///
    /// `n == 0` frees every sector and leaves the chain empty.
    pub fn shrink(&mut self, n: u32) -> Result<()> {
        self.reset();

        let mut next = if n == 0 {
            std::mem::replace(&mut self.start, ENDOFCHAIN)
        } else {
            if !self.move_to(n - 1)? {
                return Ok(());
            }
            let tail = self.current;
            let link = self.table.get(tail)?;
            self.table.set(tail, ENDOFCHAIN)?;
            link
        };

        let limit = self.table.entry_count()?;
        let mut freed = 0u32;
        while !is_end_of_chain(next) {
            if !is_valid_id(next) || freed >= limit {
                return Err(CfbError::corruption(format!(
                    "cannot free chain link {:#x} after {} sectors",
                    next, freed
                )));
            }
            let following = self.table.get(next)?;
            self.table.set(next, FREESECT)?;
            next = following;
            freed += 1;
        }

        self.reset();
        debug!("Shrunk chain to {} sectors, freed {}", n, freed);
        Ok(())
    }

    /// Read from the current sector
    pub fn read_current(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let id = self.require_current()?;
        self.table.read_sector(id, offset, buf)
    }

    /// Write into the current sector
    pub fn write_current(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let id = self.require_current()?;
        self.table.write_sector(id, offset, data)
    }

    fn require_current(&self) -> Result<u32> {
        self.current()
            .ok_or_else(|| CfbError::InvalidOperation("chain cursor is not on a sector".into()))
    }

    /// Every sector id of the chain in order
    pub fn collect_ids(&mut self) -> Result<Vec<u32>> {
        self.reset();
        let mut ids = Vec::new();
        while self.move_next()? {
            ids.push(self.current);
        }
        Ok(ids)
    }
}
