//! I/O context for an open compound file
//!
//! The context owns the byte source, the in-memory header and the directory
//! free list. Tables and the directory pool are short-lived views borrowed
//! from it, so every read and write of the file funnels through here.

use crate::allocator::fat::Fat;
use crate::allocator::mini_fat::MiniFat;
use crate::directory::{Color, Directories, DirectoryEntry, EntryType};
use crate::error::{CfbError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::options::{CompoundFileOptions, OverlayStore};
use crate::sector::ENDOFCHAIN;
use crate::transacted::TransactedStream;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Byte source a compound file can live in
///
/// Implemented for every `Read + Write + Seek + Send` type, including
/// `std::fs::File` and `Cursor<Vec<u8>>`.
pub trait Backing: Read + Write + Seek + Send + Any {
    /// Recover the concrete source, e.g. via `downcast::<Cursor<Vec<u8>>>()`
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Read + Write + Seek + Send + 'static> Backing for T {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

enum SectorSource {
    Direct(Box<dyn Backing>),
    Transacted(TransactedStream),
}

pub(crate) type SharedContext = Arc<Mutex<IoContext>>;

pub struct IoContext {
    source: Option<SectorSource>,
    pub(crate) header: Header,
    options: CompoundFileOptions,
    /// Logical file length in bytes, header included
    length: u64,
    header_dirty: bool,
    /// Unallocated directory records, rebuilt lazily
    pub(crate) free_entries: Option<BTreeSet<u32>>,
    /// Stamp given to a record id each time it is handed out
    generations: HashMap<u32, u64>,
    next_generation: u64,
    disposed: bool,
}

impl IoContext {
    /// Create or open a compound file over `source`
    pub fn new(mut source: Box<dyn Backing>, options: CompoundFileOptions) -> Result<Self> {
        if options.create && options.read_only {
            return Err(CfbError::InvalidOperation(
                "cannot create a read-only compound file".into(),
            ));
        }

        let (header, length) = if options.create {
            (Header::new(options.version), 0)
        } else {
            let source_len = source.seek(SeekFrom::End(0))?;
            if source_len < HEADER_SIZE as u64 {
                return Err(CfbError::HeaderCorrupt(format!(
                    "source is {} bytes, shorter than the header",
                    source_len
                )));
            }
            let mut bytes = [0u8; HEADER_SIZE];
            read_fully(&mut *source, 0, &mut bytes)?;
            let header = Header::from_bytes(&bytes)?;
            let sector_size = header.sector_size() as u64;
            (header, source_len.div_ceil(sector_size) * sector_size)
        };

        let source = if options.transacted {
            let overlay: Box<dyn Backing> = match options.overlay {
                OverlayStore::Memory => Box::new(Cursor::new(Vec::new())),
                OverlayStore::TempFile => Box::new(tempfile::tempfile()?),
            };
            SectorSource::Transacted(TransactedStream::new(
                source,
                overlay,
                header.sector_size(),
            )?)
        } else {
            SectorSource::Direct(source)
        };

        let mut context = IoContext {
            source: Some(source),
            header,
            options,
            length,
            header_dirty: false,
            free_entries: None,
            generations: HashMap::new(),
            next_generation: 0,
            disposed: false,
        };

        if context.options.create {
            context.initialize()?;
        } else {
            let root = context.directories().get_raw(0)?;
            if root.entry_type != EntryType::Root {
                return Err(CfbError::HeaderCorrupt(format!(
                    "directory entry 0 is {:?}, expected the root",
                    root.entry_type
                )));
            }
        }

        info!(
            "Opened compound file: version {:?}, {} bytes, transacted: {}",
            context.header.version, context.length, context.options.transacted
        );

        Ok(context)
    }

    /// Lay out the header and the root entry of an empty file
    fn initialize(&mut self) -> Result<()> {
        let sector_size = self.sector_size() as u64;
        self.grow_to(sector_size)?;
        self.header_dirty = true;

        let mut root = self.directories().create_or_recycle()?;
        if root.id != 0 {
            return Err(CfbError::corruption(format!(
                "root entry allocated at {} instead of 0",
                root.id
            )));
        }
        root.name = "Root Entry".to_string();
        root.entry_type = EntryType::Root;
        root.color = Color::Black;
        root.start_sector = ENDOFCHAIN;
        self.directories().write(&root)?;
        self.write_header()?;

        // A created transacted file starts from its empty layout
        if let Some(SectorSource::Transacted(stream)) = self.source.as_mut() {
            stream.commit()?;
            self.header_dirty = false;
        }

        debug!("Initialized empty {:?} compound file", self.header.version);
        Ok(())
    }

    pub fn options(&self) -> &CompoundFileOptions {
        &self.options
    }

    pub fn is_transacted(&self) -> bool {
        self.options.transacted
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn sector_size(&self) -> usize {
        self.header.sector_size()
    }

    /// Logical file length in bytes
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Number of regular sectors the file currently holds
    pub fn sector_count(&self) -> u64 {
        (self.length / self.sector_size() as u64).saturating_sub(1)
    }

    pub(crate) fn mark_header_dirty(&mut self) {
        self.header_dirty = true;
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.options.read_only {
            return Err(CfbError::NotWritable("compound file is read-only".into()));
        }
        Ok(())
    }

    fn source_mut(&mut self) -> Result<&mut SectorSource> {
        self.source.as_mut().ok_or(CfbError::AlreadyDisposed)
    }

    /// Read `buf.len()` bytes at `position`; bytes past the end read as zero
    pub fn read_at(&mut self, mut position: u64, buf: &mut [u8]) -> Result<()> {
        let sector_size = self.sector_size() as u64;
        match self.source_mut()? {
            SectorSource::Direct(source) => read_fully(&mut **source, position, buf),
            SectorSource::Transacted(stream) => {
                let mut done = 0;
                while done < buf.len() {
                    let room = (sector_size - position % sector_size) as usize;
                    let count = room.min(buf.len() - done);
                    stream.read_at(position, &mut buf[done..done + count])?;
                    done += count;
                    position += count as u64;
                }
                Ok(())
            }
        }
    }

    pub fn write_at(&mut self, position: u64, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let sector_size = self.sector_size() as u64;

        match self.source_mut()? {
            SectorSource::Direct(source) => {
                source.seek(SeekFrom::Start(position))?;
                source.write_all(data)?;
            }
            SectorSource::Transacted(stream) => {
                let mut done = 0;
                let mut cursor = position;
                while done < data.len() {
                    let room = (sector_size - cursor % sector_size) as usize;
                    let count = room.min(data.len() - done);
                    stream.write_at(cursor, &data[done..done + count])?;
                    done += count;
                    cursor += count as u64;
                }
            }
        }

        self.length = self.length.max(position + data.len() as u64);
        Ok(())
    }

    pub fn read_u32_at(&mut self, position: u64) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_at(position, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32_at(&mut self, position: u64, value: u32) -> Result<()> {
        self.write_at(position, &value.to_le_bytes())
    }

    /// Zero-fill the file up to `end`
    pub fn grow_to(&mut self, end: u64) -> Result<()> {
        if end <= self.length {
            return Ok(());
        }

        let sector_size = self.sector_size() as u64;
        let zeros = vec![0u8; sector_size as usize];
        let mut position = self.length;
        while position < end {
            let count = (end - position).min(sector_size - position % sector_size);
            self.write_at(position, &zeros[..count as usize])?;
            position += count;
        }
        Ok(())
    }

    pub(crate) fn write_header(&mut self) -> Result<()> {
        let bytes = self.header.to_bytes();
        self.write_at(0, &bytes)?;
        self.header_dirty = false;
        Ok(())
    }

    pub fn fat(&mut self) -> Fat<'_> {
        Fat::new(self)
    }

    pub fn mini_fat(&mut self) -> MiniFat<'_> {
        MiniFat::new(self)
    }

    pub fn directories(&mut self) -> Directories<'_> {
        Directories::new(self)
    }

    /// Stamp of the current occupant of record `id`; handles compare it to
    /// the stamp they were opened with
    pub(crate) fn generation(&self, id: u32) -> u64 {
        self.generations.get(&id).copied().unwrap_or(0)
    }

    pub(crate) fn stamp_generation(&mut self, id: u32) {
        self.next_generation += 1;
        self.generations.insert(id, self.next_generation);
    }

    pub fn root_entry(&mut self) -> Result<DirectoryEntry> {
        self.directories().get(0)
    }

    /// Persist the header and flush the source
    ///
    /// Transacted files only reach their source through [`IoContext::commit`].
    pub fn flush(&mut self) -> Result<()> {
        if self.options.read_only || self.options.transacted {
            return Ok(());
        }

        if self.header_dirty {
            self.write_header()?;
        }
        if let SectorSource::Direct(source) = self.source_mut()? {
            source.flush()?;
        }
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if !self.options.transacted {
            return Err(CfbError::NotWritable(
                "commit requires a transacted compound file".into(),
            ));
        }
        self.ensure_writable()?;
        self.write_header()?;

        if let SectorSource::Transacted(stream) = self.source_mut()? {
            let dirty = stream.dirty_sector_count();
            stream.commit()?;
            info!("Committed transaction ({} sectors)", dirty);
        }
        Ok(())
    }

    pub fn revert(&mut self) -> Result<()> {
        if !self.options.transacted {
            return Err(CfbError::NotWritable(
                "revert requires a transacted compound file".into(),
            ));
        }

        let length = match self.source_mut()? {
            SectorSource::Transacted(stream) => {
                stream.revert();
                stream.len()
            }
            SectorSource::Direct(_) => {
                return Err(CfbError::InvalidOperation(
                    "transacted file has no overlay".into(),
                ))
            }
        };

        let mut bytes = [0u8; HEADER_SIZE];
        self.read_at(0, &mut bytes)?;
        self.header = Header::from_bytes(&bytes)?;
        let sector_size = self.sector_size() as u64;
        self.length = length.div_ceil(sector_size) * sector_size;
        self.header_dirty = false;
        self.free_entries = None;

        info!("Reverted transaction");
        Ok(())
    }

    /// Flush and release the source
    ///
    /// Returns the source when the file was opened with `leave_open`.
    /// Uncommitted transacted writes are discarded.
    pub fn shutdown(&mut self) -> Result<Option<Box<dyn Backing>>> {
        if self.disposed {
            return Ok(None);
        }

        let flushed = self.flush();
        self.disposed = true;

        let source = match self.source.take() {
            Some(SectorSource::Direct(source)) => Some(source),
            Some(SectorSource::Transacted(stream)) => {
                if stream.dirty_sector_count() > 0 {
                    debug!(
                        "Discarding {} uncommitted sectors on close",
                        stream.dirty_sector_count()
                    );
                }
                Some(stream.into_inner())
            }
            None => None,
        };
        flushed?;

        Ok(if self.options.leave_open { source } else { None })
    }
}

impl Drop for IoContext {
    fn drop(&mut self) {
        if !self.disposed {
            if let Err(e) = self.flush() {
                warn!("Failed to flush compound file on drop: {}", e);
            }
        }
    }
}

/// Run `f` against the context behind a handle's weak reference
pub(crate) fn with_context<T>(
    context: &Weak<Mutex<IoContext>>,
    f: impl FnOnce(&mut IoContext) -> Result<T>,
) -> Result<T> {
    let context = context.upgrade().ok_or(CfbError::AlreadyDisposed)?;
    let mut guard = context.lock();
    if guard.disposed {
        return Err(CfbError::AlreadyDisposed);
    }
    f(&mut guard)
}

/// Read at `position` until `buf` is full or the source ends; the rest is zeroed
fn read_fully(source: &mut dyn Backing, position: u64, buf: &mut [u8]) -> Result<()> {
    source.seek(SeekFrom::Start(position))?;
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    buf[filled..].fill(0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Version;
    use crate::options::CompoundFileBuilder;

    fn created(version: Version) -> IoContext {
        let options = CompoundFileBuilder::new().create().version(version).options();
        IoContext::new(Box::new(Cursor::new(Vec::new())), options).unwrap()
    }

    #[test]
    fn test_create_lays_out_root() {
        let mut context = created(Version::V3);
        let root = context.root_entry().unwrap();
        assert_eq!(root.id, 0);
        assert_eq!(root.entry_type, EntryType::Root);
        assert_eq!(root.name, "Root Entry");

        // Header slot, FAT sector, directory sector
        assert_eq!(context.len(), 3 * 512);
        assert_eq!(context.header.fat_sector_count, 1);
        assert_eq!(context.header.difat[0], 0);
        assert_eq!(context.header.first_directory_sector, 1);
    }

    #[test]
    fn test_v4_file_uses_large_sectors() {
        let context = created(Version::V4);
        assert_eq!(context.sector_size(), 4096);
        assert_eq!(context.len(), 3 * 4096);
        assert_eq!(context.header.directory_sector_count, 1);
    }

    #[test]
    fn test_read_past_end_is_zero() {
        let mut context = created(Version::V3);
        let mut buf = [0xAAu8; 16];
        context.read_at(100_000, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let mut context = created(Version::V3);
        context.flush().unwrap();
        let source = {
            context.options.leave_open = true;
            context.shutdown().unwrap().unwrap()
        };

        let options = CompoundFileBuilder::new().read_only().options();
        let mut context = IoContext::new(source, options).unwrap();
        assert!(matches!(
            context.write_at(0, &[1]),
            Err(CfbError::NotWritable(_))
        ));
    }

    #[test]
    fn test_create_read_only_is_invalid() {
        let options = CompoundFileBuilder::new().create().read_only().options();
        let result = IoContext::new(Box::new(Cursor::new(Vec::new())), options);
        assert!(matches!(result, Err(CfbError::InvalidOperation(_))));
    }

    #[test]
    fn test_commit_requires_transaction() {
        let mut context = created(Version::V3);
        assert!(matches!(context.commit(), Err(CfbError::NotWritable(_))));
        assert!(matches!(context.revert(), Err(CfbError::NotWritable(_))));
    }

    #[test]
    fn test_open_rejects_short_source() {
        let result = IoContext::new(
            Box::new(Cursor::new(vec![0u8; 100])),
            CompoundFileOptions::default(),
        );
        assert!(matches!(result, Err(CfbError::HeaderCorrupt(_))));
    }

    #[test]
    fn test_with_context_after_drop() {
        let context: SharedContext = Arc::new(Mutex::new(created(Version::V3)));
        let weak = Arc::downgrade(&context);
        assert!(with_context(&weak, |ctx| Ok(ctx.sector_size())).is_ok());

        drop(context);
        assert!(matches!(
            with_context(&weak, |ctx| Ok(ctx.sector_size())),
            Err(CfbError::AlreadyDisposed)
        ));
    }
}
