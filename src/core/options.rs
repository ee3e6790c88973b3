//! Open / create configuration

use crate::header::Version;
use serde::{Deserialize, Serialize};

/// Where a transaction keeps modified sectors until commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayStore {
    /// Keep dirty sectors in memory
    #[default]
    Memory,
    /// Spill dirty sectors to an anonymous temporary file
    TempFile,
}

/// Options recognised by [`crate::CompoundFile`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompoundFileOptions {
    /// Initialise a new, empty file instead of reading an existing header
    pub create: bool,
    /// Hand the byte source back from `close` instead of dropping it
    pub leave_open: bool,
    /// Route every write through a copy-on-write overlay until `commit`
    pub transacted: bool,
    /// Reject all mutations
    pub read_only: bool,
    /// Format version used when creating (ignored when opening)
    pub version: Version,
    /// Overlay placement for transacted files
    pub overlay: OverlayStore,
}

impl Default for CompoundFileOptions {
    fn default() -> Self {
        CompoundFileOptions {
            create: false,
            leave_open: false,
            transacted: false,
            read_only: false,
            version: Version::V3,
            overlay: OverlayStore::Memory,
        }
    }
}

/// Builder for [`CompoundFileOptions`]
///
/// # Examples
///
/// ```rust
/// use cfb_rs::{CompoundFileBuilder, Version};
///
/// let options = CompoundFileBuilder::new()
///     .create()
///     .version(Version::V4)
///     .transacted()
///     .options();
/// assert!(options.create && options.transacted);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompoundFileBuilder {
    options: CompoundFileOptions,
}

impl CompoundFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self) -> Self {
        self.options.create = true;
        self
    }

    pub fn leave_open(mut self) -> Self {
        self.options.leave_open = true;
        self
    }

    pub fn transacted(mut self) -> Self {
        self.options.transacted = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.options.read_only = true;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.options.version = version;
        self
    }

    pub fn overlay(mut self, overlay: OverlayStore) -> Self {
        self.options.overlay = overlay;
        self
    }

    /// Finish without opening anything
    pub fn options(self) -> CompoundFileOptions {
        self.options
    }
}
