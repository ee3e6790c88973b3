//! # cfb-rs - Compound File Binary containers
//!
//! `cfb-rs` reads and writes Compound File Binary files, the single-file
//! hierarchical container behind `.msi`, `.msg` and legacy Office documents.
//! A compound file holds a tree of storages (directories) and streams (files)
//! and is byte-compatible with the long-standing on-disk layout:
//!
//! - **Version 3 and 4** files (512-byte and 4096-byte sectors)
//! - **Mini stream** for streams under 4096 bytes, with automatic migration
//!   when a stream crosses the cutoff
//! - **Transactions**: copy-on-write overlay with `commit` / `revert`
//! - **Shared handles**: any number of storage and stream handles over one file
//!
//! ## Quick Start
//!
//! ```rust
//! use cfb_rs::{CompoundFileBuilder, Result};
//! use std::io::{Cursor, Read, Write};
//!
//! # fn main() -> Result<()> {
//! let file = CompoundFileBuilder::new().create_in(Cursor::new(Vec::new()))?;
//! let root = file.root();
//!
//! let docs = root.create_storage("Documents")?;
//! docs.create_stream("Report")?.write_all(b"Hello, World!")?;
//!
//! let mut text = String::new();
//! docs.open_stream("Report")?.read_to_string(&mut text)?;
//! assert_eq!(text, "Hello, World!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Transactions
//!
//! ```rust,no_run
//! use cfb_rs::{CompoundFileBuilder, Result};
//! use std::io::Write;
//!
//! # fn main() -> Result<()> {
//! let file = CompoundFileBuilder::new()
//!     .transacted()
//!     .open_path("existing.cfb")?;
//!
//! file.root().create_stream("Draft")?.write_all(b"not yet")?;
//! file.revert()?; // the draft is gone, the file on disk never changed
//!
//! file.root().create_stream("Final")?.write_all(b"keep")?;
//! file.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Short crate:: paths for the engine modules
#[allow(unused_imports)]
pub(crate) use crate::core::{
    allocator, compound_file, directory, error, header, io, options, sector, storage, stream,
    transacted, validation,
};

pub use crate::core::{
    compound_file::CompoundFile,
    directory::{EntryInfo, EntryType},
    error::{CfbError, Result},
    header::{Header, Version},
    io::Backing,
    options::{CompoundFileBuilder, CompoundFileOptions, OverlayStore},
    storage::Storage,
    stream::CfbStream,
    validation::EntryName,
};

use std::path::Path;

impl CompoundFileBuilder {
    /// Create a compound file in `source` with these options
    pub fn create_in<S: Backing>(self, source: S) -> Result<CompoundFile> {
        CompoundFile::create(source, self.options())
    }

    /// Open the compound file in `source` with these options
    pub fn open_in<S: Backing>(self, source: S) -> Result<CompoundFile> {
        CompoundFile::open(source, self.options())
    }

    pub fn create_path<P: AsRef<Path>>(self, path: P) -> Result<CompoundFile> {
        CompoundFile::create_path(path, self.options())
    }

    pub fn open_path<P: AsRef<Path>>(self, path: P) -> Result<CompoundFile> {
        CompoundFile::open_path(path, self.options())
    }
}
