//! Storage handles: named children, creation, deletion and copying
//!
//! A storage is a directory record whose `child` field roots a red-black
//! tree of its children. The root entry is the top-level storage.

use crate::allocator::chain::ChainCursor;
use crate::directory::{DirectoryEntry, DirectoryTree, EntryInfo, EntryType};
use crate::error::{CfbError, Result};
use crate::io::{with_context, IoContext};
use crate::sector::ENDOFCHAIN;
use crate::stream::{is_mini, read_chain, resize_entry_filling, with_table, write_chain, CfbStream};
use crate::validation::validate_name;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Weak;
use tracing::debug;
use uuid::Uuid;

/// Handle to a storage inside an open compound file
///
/// Handles are cheap to clone and stay valid until the file is closed or
/// the storage is deleted.
#[derive(Clone)]
pub struct Storage {
    context: Weak<Mutex<IoContext>>,
    id: u32,
    generation: u64,
}

/// Detached copy of an entry and everything below it
struct Snapshot {
    entry: DirectoryEntry,
    data: Vec<u8>,
    children: Vec<Snapshot>,
}

impl Storage {
    pub(crate) fn new(context: Weak<Mutex<IoContext>>, id: u32, generation: u64) -> Self {
        Storage {
            context,
            id,
            generation,
        }
    }

    fn entry(&self) -> Result<DirectoryEntry> {
        with_context(&self.context, |ctx| self.live(ctx))
    }

    /// This storage's record, unless it was deleted since the handle was made
    fn live(&self, ctx: &mut IoContext) -> Result<DirectoryEntry> {
        ctx.directories().get_live(self.id, self.generation)
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.entry()?.name)
    }

    pub fn info(&self) -> Result<EntryInfo> {
        Ok(self.entry()?.info())
    }

    /// Direct children in directory order
    pub fn entries(&self) -> Result<Vec<EntryInfo>> {
        with_context(&self.context, |ctx| {
            self.live(ctx)?;
            Ok(DirectoryTree::new(ctx, self.id)
                .entries()?
                .iter()
                .map(DirectoryEntry::info)
                .collect())
        })
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        with_context(&self.context, |ctx| {
            self.live(ctx)?;
            Ok(DirectoryTree::new(ctx, self.id).try_get(name)?.is_some())
        })
    }

    pub fn create_storage(&self, name: &str) -> Result<Storage> {
        let (id, generation) = self.create_entry(name, EntryType::Storage)?;
        Ok(Storage::new(self.context.clone(), id, generation))
    }

    pub fn create_stream(&self, name: &str) -> Result<CfbStream> {
        let (id, generation) = self.create_entry(name, EntryType::Stream)?;
        Ok(CfbStream::new(self.context.clone(), id, generation))
    }

    pub fn open_storage(&self, name: &str) -> Result<Storage> {
        let (id, generation) = self.find(name, EntryType::Storage)?;
        Ok(Storage::new(self.context.clone(), id, generation))
    }

    pub fn open_stream(&self, name: &str) -> Result<CfbStream> {
        let (id, generation) = self.find(name, EntryType::Stream)?;
        Ok(CfbStream::new(self.context.clone(), id, generation))
    }

    /// Record id and generation of the child `name` of type `entry_type`
    fn find(&self, name: &str, entry_type: EntryType) -> Result<(u32, u64)> {
        with_context(&self.context, |ctx| {
            self.live(ctx)?;
            match DirectoryTree::new(ctx, self.id).try_get(name)? {
                Some(entry) if entry.entry_type == entry_type => {
                    Ok((entry.id, ctx.generation(entry.id)))
                }
                _ => Err(CfbError::EntryNotFound(format!(
                    "{} '{}'",
                    if entry_type == EntryType::Stream {
                        "stream"
                    } else {
                        "storage"
                    },
                    name
                ))),
            }
        })
    }

    fn create_entry(&self, name: &str, entry_type: EntryType) -> Result<(u32, u64)> {
        validate_name(name)?;
        with_context(&self.context, |ctx| {
            ctx.ensure_writable()?;
            self.live(ctx)?;
            let id = create_child(ctx, self.id, name, entry_type)?;
            Ok((id, ctx.generation(id)))
        })
    }

    /// Remove a child; storages are removed with everything below them
    ///
    /// Stream sectors are released to their table before the record is
    /// recycled.
    pub fn delete(&self, name: &str) -> Result<()> {
        with_context(&self.context, |ctx| {
            ctx.ensure_writable()?;
            self.live(ctx)?;
            let entry = DirectoryTree::new(ctx, self.id)
                .try_get(name)?
                .ok_or_else(|| CfbError::EntryNotFound(name.to_string()))?;

            purge(ctx, &entry)?;
            DirectoryTree::new(ctx, self.id).remove(entry.id)?;
            debug!("Deleted '{}' from entry {}", name, self.id);
            Ok(())
        })
    }

    /// Copy every child of this storage, recursively, into `destination`
    ///
    /// `destination` may belong to another file. Fails without changes if a
    /// child's name already exists there.
    pub fn copy_to(&self, destination: &Storage) -> Result<()> {
        let children = with_context(&self.context, |ctx| {
            self.live(ctx)?;
            snapshot_children(ctx, self.id)
        })?;

        if Weak::ptr_eq(&self.context, &destination.context)
            && (destination.id == self.id || children.iter().any(|c| c.holds(destination.id)))
        {
            return Err(CfbError::InvalidOperation(
                "cannot copy a storage into itself".into(),
            ));
        }

        with_context(&destination.context, |ctx| {
            ctx.ensure_writable()?;
            destination.live(ctx)?;
            for child in &children {
                if DirectoryTree::new(ctx, destination.id)
                    .try_get(&child.entry.name)?
                    .is_some()
                {
                    return Err(CfbError::EntryExists(child.entry.name.clone()));
                }
            }
            for child in &children {
                restore(ctx, destination.id, child)?;
            }
            debug!(
                "Copied {} entries from entry {} to entry {}",
                children.len(),
                self.id,
                destination.id
            );
            Ok(())
        })
    }

    pub fn set_clsid(&self, clsid: Uuid) -> Result<()> {
        self.update(|entry| {
            entry.clsid = clsid;
            Ok(())
        })
    }

    pub fn set_state_bits(&self, state_bits: u32) -> Result<()> {
        self.update(|entry| {
            entry.state_bits = state_bits;
            Ok(())
        })
    }

    /// The root entry only accepts `None`
    pub fn set_creation_time(&self, time: Option<DateTime<Utc>>) -> Result<()> {
        self.update(|entry| entry.set_creation_time(time))
    }

    /// The root entry only accepts `None`
    pub fn set_modified_time(&self, time: Option<DateTime<Utc>>) -> Result<()> {
        self.update(|entry| entry.set_modified_time(time))
    }

    fn update(&self, f: impl FnOnce(&mut DirectoryEntry) -> Result<()>) -> Result<()> {
        with_context(&self.context, |ctx| {
            ctx.ensure_writable()?;
            let mut entry = self.live(ctx)?;
            f(&mut entry)?;
            ctx.directories().write(&entry)
        })
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("id", &self.id).finish()
    }
}

impl Snapshot {
    fn holds(&self, id: u32) -> bool {
        self.entry.id == id || self.children.iter().any(|c| c.holds(id))
    }
}

/// Allocate, name and link a new child of `parent`
fn create_child(
    ctx: &mut IoContext,
    parent: u32,
    name: &str,
    entry_type: EntryType,
) -> Result<u32> {
    let parent_entry = ctx.directories().get(parent)?;
    if !parent_entry.entry_type.is_storage() {
        return Err(CfbError::InvalidOperation(format!(
            "'{}' is not a storage",
            parent_entry.name
        )));
    }
    if DirectoryTree::new(ctx, parent).try_get(name)?.is_some() {
        return Err(CfbError::EntryExists(name.to_string()));
    }

    let mut entry = ctx.directories().create_or_recycle()?;
    if let Err(err) = link_child(ctx, parent, &mut entry, name, entry_type) {
        ctx.directories().release(entry.id);
        return Err(err);
    }
    debug!(
        "Created {:?} '{}' as entry {} under entry {}",
        entry_type, name, entry.id, parent
    );
    Ok(entry.id)
}

fn link_child(
    ctx: &mut IoContext,
    parent: u32,
    entry: &mut DirectoryEntry,
    name: &str,
    entry_type: EntryType,
) -> Result<()> {
    entry.name = name.to_string();
    entry.entry_type = entry_type;
    match entry_type {
        EntryType::Stream => entry.start_sector = ENDOFCHAIN,
        _ => {
            let now = Some(Utc::now());
            entry.set_creation_time(now)?;
            entry.set_modified_time(now)?;
        }
    }
    DirectoryTree::new(ctx, parent).add(entry)
}

/// Release everything `entry` owns, leaving its own record in place
fn purge(ctx: &mut IoContext, entry: &DirectoryEntry) -> Result<()> {
    match entry.entry_type {
        EntryType::Stream => {
            if entry.stream_length > 0 {
                with_table(ctx, is_mini(entry.stream_length), |table| {
                    ChainCursor::new(table, entry.start_sector).shrink(0)
                })?;
            }
        }
        EntryType::Storage => {
            for child in DirectoryTree::new(ctx, entry.id).entries()? {
                purge(ctx, &child)?;
                ctx.directories().recycle(child.id)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn snapshot_children(ctx: &mut IoContext, parent: u32) -> Result<Vec<Snapshot>> {
    let mut snapshots = Vec::new();
    for entry in DirectoryTree::new(ctx, parent).entries()? {
        let mut snapshot = Snapshot {
            data: Vec::new(),
            children: Vec::new(),
            entry,
        };
        match snapshot.entry.entry_type {
            EntryType::Stream => {
                let length = snapshot.entry.stream_length;
                let start = snapshot.entry.start_sector;
                let capacity = if length == 0 {
                    0
                } else {
                    with_table(ctx, is_mini(length), |table| {
                        let unit = table.sector_size() as u64;
                        Ok(ChainCursor::new(table, start).count()? as u64 * unit)
                    })?
                };
                if length > capacity {
                    return Err(CfbError::corruption(format!(
                        "stream '{}' claims {} bytes but its chain holds {}",
                        snapshot.entry.name, length, capacity
                    )));
                }
                snapshot.data = vec![0u8; length as usize];
                let read = with_table(ctx, is_mini(length), |table| {
                    read_chain(table, start, 0, &mut snapshot.data, length)
                })?;
                if read as u64 != length {
                    return Err(CfbError::corruption(format!(
                        "stream '{}' chain holds {} of {} bytes",
                        snapshot.entry.name, read, length
                    )));
                }
            }
            _ => snapshot.children = snapshot_children(ctx, snapshot.entry.id)?,
        }
        snapshots.push(snapshot);
    }
    Ok(snapshots)
}

fn restore(ctx: &mut IoContext, parent: u32, snapshot: &Snapshot) -> Result<()> {
    let source = &snapshot.entry;
    let id = create_child(ctx, parent, &source.name, source.entry_type)?;

    let mut entry = ctx.directories().get(id)?;
    entry.clsid = source.clsid;
    entry.state_bits = source.state_bits;
    entry.creation_time = source.creation_time;
    entry.modified_time = source.modified_time;

    if source.entry_type == EntryType::Stream {
        resize_entry_filling(ctx, &mut entry, snapshot.data.len() as u64, 0)?;
        if !snapshot.data.is_empty() {
            let start = entry.start_sector;
            with_table(ctx, is_mini(entry.stream_length), |table| {
                write_chain(table, start, 0, &snapshot.data)
            })?;
        }
    }
    ctx.directories().write(&entry)?;

    for child in &snapshot.children {
        restore(ctx, id, child)?;
    }
    Ok(())
}
