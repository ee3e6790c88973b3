//! Open compound file
//!
//! Owns the shared I/O context. Storage and stream handles hold weak
//! references to it and fail with `AlreadyDisposed` once the file is closed
//! or dropped.

use crate::error::Result;
use crate::header::Header;
use crate::io::{Backing, IoContext, SharedContext};
use crate::options::CompoundFileOptions;
use crate::storage::Storage;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub struct CompoundFile {
    context: SharedContext,
}

impl CompoundFile {
    /// Initialise a new, empty compound file in `source`
    ///
    /// `options.create` is implied.
    pub fn create<S: Backing>(source: S, mut options: CompoundFileOptions) -> Result<Self> {
        options.create = true;
        Self::with_options(Box::new(source), options)
    }

    /// Open the compound file stored in `source`
    pub fn open<S: Backing>(source: S, mut options: CompoundFileOptions) -> Result<Self> {
        options.create = false;
        Self::with_options(Box::new(source), options)
    }

    /// Create (or truncate) the file at `path`
    pub fn create_path<P: AsRef<Path>>(path: P, options: CompoundFileOptions) -> Result<Self> {
        info!("Creating compound file at {:?}", path.as_ref());
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::create(file, options)
    }

    pub fn open_path<P: AsRef<Path>>(path: P, options: CompoundFileOptions) -> Result<Self> {
        info!("Opening compound file at {:?}", path.as_ref());
        let file = OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .open(path)?;
        Self::open(file, options)
    }

    fn with_options(source: Box<dyn Backing>, options: CompoundFileOptions) -> Result<Self> {
        let context = IoContext::new(source, options)?;
        Ok(CompoundFile {
            context: Arc::new(Mutex::new(context)),
        })
    }

    /// The root storage
    pub fn root(&self) -> Storage {
        let generation = self.context.lock().generation(0);
        Storage::new(Arc::downgrade(&self.context), 0, generation)
    }

    pub fn options(&self) -> CompoundFileOptions {
        self.context.lock().options().clone()
    }

    pub fn header(&self) -> Header {
        self.context.lock().header.clone()
    }

    /// Logical length of the file in bytes
    pub fn len(&self) -> u64 {
        self.context.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write every change made since open or the last commit to the source
    ///
    /// Only available on transacted files.
    pub fn commit(&self) -> Result<()> {
        self.context.lock().commit()
    }

    /// Drop every change made since open or the last commit
    ///
    /// Only available on transacted files. Existing handles stay valid but
    /// entries created since the last commit disappear.
    pub fn revert(&self) -> Result<()> {
        self.context.lock().revert()
    }

    pub fn flush(&self) -> Result<()> {
        self.context.lock().flush()
    }

    /// Flush and close the file
    ///
    /// Returns the byte source when opened with `leave_open`. Uncommitted
    /// changes to a transacted file are discarded.
    pub fn close(self) -> Result<Option<Box<dyn Backing>>> {
        let source = self.context.lock().shutdown()?;
        info!("Closed compound file");
        Ok(source)
    }
}

impl std::fmt::Debug for CompoundFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ctx = self.context.lock();
        f.debug_struct("CompoundFile")
            .field("version", &ctx.header.version)
            .field("length", &ctx.len())
            .field("transacted", &ctx.is_transacted())
            .finish()
    }
}
