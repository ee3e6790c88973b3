//! Copy-on-write overlay for transacted files
//!
//! Writes never reach the backing source until [`TransactedStream::commit`].
//! Each modified sector gets a sector-sized region in the overlay store; the
//! dirty map records where. Sector numbers here are physical: sector `k`
//! spans bytes `[k * size, (k + 1) * size)` of the backing source, header
//! included.

use crate::error::{CfbError, Result};
use crate::io::Backing;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::debug;

pub struct TransactedStream {
    original: Box<dyn Backing>,
    original_len: u64,
    overlay: Box<dyn Backing>,
    overlay_len: u64,
    /// Physical sector -> overlay offset
    dirty: HashMap<u64, u64>,
    sector_size: usize,
    buffer: Vec<u8>,
}

impl TransactedStream {
    pub fn new(
        mut original: Box<dyn Backing>,
        overlay: Box<dyn Backing>,
        sector_size: usize,
    ) -> Result<Self> {
        let original_len = original.seek(SeekFrom::End(0))?;

        Ok(TransactedStream {
            original,
            original_len,
            overlay,
            overlay_len: 0,
            dirty: HashMap::new(),
            sector_size,
            buffer: vec![0u8; sector_size],
        })
    }

    /// Logical length: the backing length or the end of the last dirty sector
    pub fn len(&self) -> u64 {
        let dirty_end = self
            .dirty
            .keys()
            .map(|&sector| (sector + 1) * self.sector_size as u64)
            .max()
            .unwrap_or(0);
        self.original_len.max(dirty_end)
    }

    pub fn dirty_sector_count(&self) -> usize {
        self.dirty.len()
    }

    /// Split `position` into `(sector, offset)` and check that `count` bytes
    /// stay inside that sector
    fn locate(&self, position: u64, count: usize) -> Result<(u64, usize)> {
        let sector = position / self.sector_size as u64;
        let offset = (position % self.sector_size as u64) as usize;
        if offset + count > self.sector_size {
            return Err(CfbError::BufferArgumentInvalid {
                offset: position,
                count,
                limit: (sector + 1) * self.sector_size as u64,
            });
        }
        Ok((sector, offset))
    }

    /// Read `buf.len()` bytes at `position` without crossing a sector
    ///
    /// Bytes past the end of the backing source read as zero.
    pub fn read_at(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        let (sector, offset) = self.locate(position, buf.len())?;

        if let Some(&overlay_position) = self.dirty.get(&sector) {
            self.overlay
                .seek(SeekFrom::Start(overlay_position + offset as u64))?;
            self.overlay.read_exact(buf)?;
            return Ok(());
        }

        read_padded(&mut *self.original, self.original_len, position, buf)
    }

    /// Write `data` at `position` without crossing a sector
    pub fn write_at(&mut self, position: u64, data: &[u8]) -> Result<()> {
        let (sector, offset) = self.locate(position, data.len())?;

        let overlay_position = match self.dirty.get(&sector) {
            Some(&overlay_position) => overlay_position,
            None => {
                let overlay_position = self.overlay_len;
                let sector_start = sector * self.sector_size as u64;

                // Preserve the bytes this write does not cover
                if data.len() != self.sector_size && sector_start < self.original_len {
                    read_padded(
                        &mut *self.original,
                        self.original_len,
                        sector_start,
                        &mut self.buffer,
                    )?;
                } else {
                    self.buffer.fill(0);
                }

                self.overlay.seek(SeekFrom::Start(overlay_position))?;
                self.overlay.write_all(&self.buffer)?;
                self.overlay_len += self.sector_size as u64;
                self.dirty.insert(sector, overlay_position);

                debug!(
                    "Sector {} now dirty at overlay offset {}",
                    sector, overlay_position
                );
                overlay_position
            }
        };

        self.overlay
            .seek(SeekFrom::Start(overlay_position + offset as u64))?;
        self.overlay.write_all(data)?;
        Ok(())
    }

    /// Copy every dirty sector to the backing source and clear the map
    pub fn commit(&mut self) -> Result<()> {
        let mut sectors: Vec<(u64, u64)> = self.dirty.iter().map(|(&s, &o)| (s, o)).collect();
        sectors.sort_unstable();

        for (sector, overlay_position) in &sectors {
            self.overlay.seek(SeekFrom::Start(*overlay_position))?;
            self.overlay.read_exact(&mut self.buffer)?;

            let position = sector * self.sector_size as u64;
            self.original.seek(SeekFrom::Start(position))?;
            self.original.write_all(&self.buffer)?;
            self.original_len = self.original_len.max(position + self.sector_size as u64);
        }

        self.original.flush()?;
        debug!("Committed {} dirty sectors", sectors.len());

        self.dirty.clear();
        self.overlay_len = 0;
        Ok(())
    }

    /// Forget every pending write; the backing source is untouched
    pub fn revert(&mut self) {
        debug!("Reverting {} dirty sectors", self.dirty.len());
        self.dirty.clear();
        self.overlay_len = 0;
    }

    pub fn into_inner(self) -> Box<dyn Backing> {
        self.original
    }
}

/// Read at `position`, zero-filling whatever lies past `len`
pub(crate) fn read_padded(
    source: &mut dyn Backing,
    len: u64,
    position: u64,
    buf: &mut [u8],
) -> Result<()> {
    let available = len.saturating_sub(position).min(buf.len() as u64) as usize;
    if available > 0 {
        source.seek(SeekFrom::Start(position))?;
        source.read_exact(&mut buf[..available])?;
    }
    buf[available..].fill(0);
    Ok(())
}
