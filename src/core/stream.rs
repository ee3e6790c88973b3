//! Stream data access
//!
//! A stream's bytes live in a chain of the FAT, or of the Mini-FAT while the
//! stream is shorter than the mini stream cutoff. Crossing the cutoff in
//! either direction moves the bytes to a new chain in the other table.

use crate::allocator::chain::ChainCursor;
use crate::allocator::AllocationTable;
use crate::directory::{DirectoryEntry, EntryInfo, EntryType};
use crate::error::{CfbError, Result};
use crate::header::MINI_STREAM_CUTOFF_SIZE;
use crate::io::{with_context, IoContext};
use crate::sector::{sectors_for_length, ENDOFCHAIN};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Weak;
use tracing::debug;

/// Streams shorter than the cutoff live in the mini stream
pub fn is_mini(length: u64) -> bool {
    length < MINI_STREAM_CUTOFF_SIZE as u64
}

/// Run `f` against the FAT or the Mini-FAT
pub(crate) fn with_table<R>(
    ctx: &mut IoContext,
    mini: bool,
    f: impl FnOnce(&mut dyn AllocationTable) -> Result<R>,
) -> Result<R> {
    if mini {
        let mut table = ctx.mini_fat();
        f(&mut table)
    } else {
        let mut table = ctx.fat();
        f(&mut table)
    }
}

/// Read up to `buf.len()` bytes at `position` of a chain holding `length` bytes
///
/// Stops early when the chain is shorter than `length`.
pub(crate) fn read_chain(
    table: &mut dyn AllocationTable,
    start: u32,
    position: u64,
    buf: &mut [u8],
    length: u64,
) -> Result<usize> {
    if position >= length {
        return Ok(0);
    }

    let count = buf.len().min((length - position) as usize);
    let unit = table.sector_size() as u64;
    let mut cursor = ChainCursor::new(table, start);
    let mut done = 0;

    while done < count {
        let at = position + done as u64;
        if !cursor.move_to((at / unit) as u32)? {
            break;
        }
        let offset = (at % unit) as usize;
        let n = (unit as usize - offset).min(count - done);
        cursor.read_current(offset, &mut buf[done..done + n])?;
        done += n;
    }

    Ok(done)
}

/// Overwrite `data.len()` bytes at `position`; the chain must already be long
/// enough
pub(crate) fn write_chain(
    table: &mut dyn AllocationTable,
    start: u32,
    position: u64,
    data: &[u8],
) -> Result<()> {
    let unit = table.sector_size() as u64;
    let mut cursor = ChainCursor::new(table, start);
    let mut done = 0;

    while done < data.len() {
        let at = position + done as u64;
        if !cursor.move_to((at / unit) as u32)? {
            return Err(CfbError::corruption(format!(
                "chain at {} ends before byte {}",
                start, at
            )));
        }
        let offset = (at % unit) as usize;
        let n = (unit as usize - offset).min(data.len() - done);
        cursor.write_current(offset, &data[done..done + n])?;
        done += n;
    }

    Ok(())
}

fn zero_fill(ctx: &mut IoContext, entry: &DirectoryEntry, from: u64, to: u64) -> Result<()> {
    if from >= to {
        return Ok(());
    }

    let mini = is_mini(entry.stream_length);
    let start = entry.start_sector;
    with_table(ctx, mini, |table| {
        let unit = table.sector_size() as u64;
        let zeros = vec![0u8; unit as usize];
        let mut cursor = ChainCursor::new(table, start);
        let mut position = from;
        while position < to {
            if !cursor.move_to((position / unit) as u32)? {
                return Err(CfbError::corruption(format!(
                    "chain at {} ends before byte {}",
                    start, position
                )));
            }
            let offset = (position % unit) as usize;
            let n = (unit - offset as u64).min(to - position) as usize;
            cursor.write_current(offset, &zeros[..n])?;
            position += n as u64;
        }
        Ok(())
    })
}

/// Resize the stream of `entry` to `length` bytes and persist the record
///
/// New bytes read as zero. The record's start sector and length are updated
/// in place.
pub(crate) fn resize_entry(
    ctx: &mut IoContext,
    entry: &mut DirectoryEntry,
    length: u64,
) -> Result<()> {
    resize_entry_filling(ctx, entry, length, length)
}

/// Like [`resize_entry`], but only zeroes new bytes below `fill_end`
///
/// For callers that overwrite `[fill_end, length)` straight away.
pub(crate) fn resize_entry_filling(
    ctx: &mut IoContext,
    entry: &mut DirectoryEntry,
    length: u64,
    fill_end: u64,
) -> Result<()> {
    ctx.ensure_writable()?;
    if entry.entry_type != EntryType::Stream {
        return Err(CfbError::InvalidOperation(format!(
            "'{}' is not a stream",
            entry.name
        )));
    }

    let old_length = entry.stream_length;
    if old_length == length {
        return Ok(());
    }

    let was_mini = is_mini(old_length);
    let now_mini = is_mini(length);

    if old_length > 0 && was_mini != now_mini {
        let kept = old_length.min(length) as usize;
        let mut bytes = vec![0u8; kept];
        let old_start = entry.start_sector;

        let read = with_table(ctx, was_mini, |table| {
            read_chain(table, old_start, 0, &mut bytes, old_length)
        })?;
        if read != kept {
            return Err(CfbError::corruption(format!(
                "stream '{}' chain holds {} of {} bytes",
                entry.name, read, kept
            )));
        }

        with_table(ctx, was_mini, |table| {
            ChainCursor::new(table, old_start).shrink(0)
        })?;
        entry.start_sector = ENDOFCHAIN;

        let start = with_table(ctx, now_mini, |table| {
            let unit = table.sector_size();
            let mut cursor = ChainCursor::new(table, ENDOFCHAIN);
            cursor.resize(sectors_for_length(length, unit))?;
            Ok(cursor.start())
        })?;
        entry.start_sector = start;
        entry.stream_length = length;

        with_table(ctx, now_mini, |table| write_chain(table, start, 0, &bytes))?;
        zero_fill(ctx, entry, kept as u64, fill_end.min(length))?;

        debug!(
            "Moved stream '{}' {} the mini stream ({} -> {} bytes)",
            entry.name,
            if now_mini { "into" } else { "out of" },
            old_length,
            length
        );
    } else {
        // Empty streams may carry any start sector
        let start = if old_length == 0 {
            ENDOFCHAIN
        } else {
            entry.start_sector
        };
        let new_start = with_table(ctx, now_mini, |table| {
            let unit = table.sector_size();
            let mut cursor = ChainCursor::new(table, start);
            cursor.resize(sectors_for_length(length, unit))?;
            Ok(cursor.start())
        })?;
        entry.start_sector = new_start;
        entry.stream_length = length;
        zero_fill(ctx, entry, old_length, fill_end.min(length))?;
    }

    ctx.directories().write(entry)
}

/// Handle to an open stream
///
/// Implements `Read`, `Write` and `Seek`. The position is per handle; the
/// data and length are shared with every other handle on the same stream.
/// Operations fail with `AlreadyDisposed` once the file is closed, and with
/// `EntryNotFound` once the stream is deleted.
pub struct CfbStream {
    context: Weak<Mutex<IoContext>>,
    id: u32,
    generation: u64,
    position: u64,
}

impl CfbStream {
    pub(crate) fn new(context: Weak<Mutex<IoContext>>, id: u32, generation: u64) -> Self {
        CfbStream {
            context,
            id,
            generation,
            position: 0,
        }
    }

    fn entry(&self) -> Result<DirectoryEntry> {
        with_context(&self.context, |ctx| {
            ctx.directories().get_live(self.id, self.generation)
        })
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.entry()?.stream_length)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Truncate or zero-extend the stream; the position is left unchanged
    pub fn set_len(&mut self, length: u64) -> Result<()> {
        let (id, generation) = (self.id, self.generation);
        with_context(&self.context, |ctx| {
            let mut entry = ctx.directories().get_live(id, generation)?;
            resize_entry(ctx, &mut entry, length)
        })
    }

    pub fn info(&self) -> Result<EntryInfo> {
        Ok(self.entry()?.info())
    }

    /// Streams only accept `None`
    pub fn set_creation_time(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        let (id, generation) = (self.id, self.generation);
        with_context(&self.context, |ctx| {
            let mut entry = ctx.directories().get_live(id, generation)?;
            entry.set_creation_time(time)?;
            ctx.directories().write(&entry)
        })
    }

    /// Streams only accept `None`
    pub fn set_modified_time(&mut self, time: Option<DateTime<Utc>>) -> Result<()> {
        let (id, generation) = (self.id, self.generation);
        with_context(&self.context, |ctx| {
            let mut entry = ctx.directories().get_live(id, generation)?;
            entry.set_modified_time(time)?;
            ctx.directories().write(&entry)
        })
    }

    /// Read from `position` without moving the cursor
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        let (id, generation) = (self.id, self.generation);
        with_context(&self.context, |ctx| {
            let entry = ctx.directories().get_live(id, generation)?;
            with_table(ctx, is_mini(entry.stream_length), |table| {
                read_chain(
                    table,
                    entry.start_sector,
                    position,
                    buf,
                    entry.stream_length,
                )
            })
        })
    }

    /// Write at `position` without moving the cursor, growing as needed
    pub fn write_at(&self, position: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let (id, generation) = (self.id, self.generation);
        let end = position
            .checked_add(data.len() as u64)
            .ok_or(CfbError::BufferArgumentInvalid {
                offset: position,
                count: data.len(),
                limit: u64::MAX,
            })?;

        with_context(&self.context, |ctx| {
            ctx.ensure_writable()?;
            let mut entry = ctx.directories().get_live(id, generation)?;
            if end > entry.stream_length {
                // Only the gap before `position` needs zeroing
                resize_entry_filling(ctx, &mut entry, end, position)?;
            }
            with_table(ctx, is_mini(entry.stream_length), |table| {
                write_chain(table, entry.start_sector, position, data)
            })
        })
    }
}

impl Read for CfbStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for CfbStream {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.write_at(self.position, data)?;
        self.position += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        with_context(&self.context, |ctx| ctx.flush())?;
        Ok(())
    }
}

impl Seek for CfbStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len()?.checked_add_signed(delta),
        };

        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
