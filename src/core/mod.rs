//! Compound File Binary format engine
//!
//! A compound file is a single flat file organised as a small filesystem of
//! storages (directories) and streams (files), allocated in fixed-size
//! sectors through a File Allocation Table.
//!
//! - [`sector`] - Sector ids, sentinels and offset arithmetic
//! - [`header`] - The 512-byte leading header and its inline DIFAT
//! - [`allocator`] - Sector allocation:
//!   - [`allocator::fat`] - FAT with DIFAT growth
//!   - [`allocator::mini_fat`] - Mini-FAT over the mini stream
//!   - [`allocator::chain`] - Chain walking, extension and truncation
//! - [`directory`] - Directory record pool and per-storage red-black trees
//! - [`transacted`] - Copy-on-write overlay for commit / revert
//! - [`io`] - The shared context every handle reads and writes through
//! - [`storage`], [`stream`] - Handles over directory entries
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (512 bytes, padded to a sector)      │
//! │  - Signature D0 CF 11 E0 A1 B1 1A E1        │
//! │  - Version 3 (512B) or 4 (4096B sectors)    │
//! │  - First 109 FAT sector ids (DIFAT)         │
//! ├─────────────────────────────────────────────┤
//! │ Sector 0..N, any order:                     │
//! │  - FAT sectors (one u32 link per sector)    │
//! │  - DIFAT sectors (FAT sector ids past 109)  │
//! │  - Directory sectors (128-byte records)     │
//! │  - Mini-FAT sectors (links per 64B sector)  │
//! │  - Mini stream (root entry's chain)         │
//! │  - Stream data (>= 4096 bytes)              │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod compound_file;
pub mod directory;
pub mod error;
pub mod header;
pub mod io;
pub mod options;
pub mod sector;
pub mod storage;
pub mod stream;
pub mod transacted;
pub mod validation;

pub use compound_file::CompoundFile;
