//! Red-black tree of one storage's children
//!
//! Nodes are directory records linked by index through their `left`,
//! `right` and storage `child` fields. Insertion is classic red-black
//! insertion with the path kept on a stack, since records have no parent
//! links. Removal rebuilds the storage's tree balanced.

use super::entry::{compare_names, Color, DirectoryEntry, NOSTREAM};
use crate::error::{CfbError, Result};
use crate::io::IoContext;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Children of the storage at record `parent`
pub struct DirectoryTree<'c> {
    ctx: &'c mut IoContext,
    parent: u32,
}

impl<'c> DirectoryTree<'c> {
    pub fn new(ctx: &'c mut IoContext, parent: u32) -> Self {
        DirectoryTree { ctx, parent }
    }

    fn parent_entry(&mut self) -> Result<DirectoryEntry> {
        let parent = self.ctx.directories().get(self.parent)?;
        if !parent.entry_type.is_storage() {
            return Err(CfbError::InvalidOperation(format!(
                "'{}' is not a storage",
                parent.name
            )));
        }
        Ok(parent)
    }

    /// Upper bound on nodes reachable from any tree
    fn node_limit(&mut self) -> Result<usize> {
        Ok(self.ctx.directories().capacity()? as usize)
    }

    pub fn try_get(&mut self, name: &str) -> Result<Option<DirectoryEntry>> {
        let limit = self.node_limit()?;
        let mut id = self.parent_entry()?.child;
        let mut visited = 0;

        while id != NOSTREAM {
            let node = self.ctx.directories().get(id)?;
            id = match compare_names(name, &node.name) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return Ok(Some(node)),
            };

            visited += 1;
            if visited > limit {
                return Err(CfbError::corruption(format!(
                    "directory tree of entry {} contains a cycle",
                    self.parent
                )));
            }
        }
        Ok(None)
    }

    /// Children in sibling order
    pub fn entries(&mut self) -> Result<Vec<DirectoryEntry>> {
        let limit = self.node_limit()?;
        let mut id = self.parent_entry()?.child;
        let mut stack: Vec<DirectoryEntry> = Vec::new();
        let mut ordered = Vec::new();

        loop {
            while id != NOSTREAM {
                let node = self.ctx.directories().get(id)?;
                id = node.left;
                stack.push(node);
                if stack.len() + ordered.len() > limit {
                    return Err(CfbError::corruption(format!(
                        "directory tree of entry {} contains a cycle",
                        self.parent
                    )));
                }
            }

            let Some(node) = stack.pop() else {
                break;
            };
            id = node.right;
            ordered.push(node);
        }

        Ok(ordered)
    }

    /// Link `entry` into the tree and write it
    ///
    /// `entry` must come from the pool; its links and color are overwritten.
    pub fn add(&mut self, entry: &mut DirectoryEntry) -> Result<()> {
        if self.try_get(&entry.name)?.is_some() {
            return Err(CfbError::EntryExists(entry.name.clone()));
        }

        let mut parent = self.parent_entry()?;
        entry.left = NOSTREAM;
        entry.right = NOSTREAM;
        entry.color = Color::Red;

        let mut edit = TreeEdit {
            ctx: &mut *self.ctx,
            nodes: HashMap::new(),
            root: parent.child,
        };

        // Descend to the insertion point, remembering the path
        let mut path = Vec::new();
        let mut id = edit.root;
        while id != NOSTREAM {
            path.push(id);
            let node = edit.node(id)?;
            id = match compare_names(&entry.name, &node.name) {
                Ordering::Less => node.left,
                _ => node.right,
            };
        }

        edit.nodes.insert(entry.id, entry.clone());
        match path.last() {
            None => edit.root = entry.id,
            Some(&leaf) => {
                let goes_left = compare_names(&entry.name, &edit.node(leaf)?.name) == Ordering::Less;
                let leaf = edit.node(leaf)?;
                if goes_left {
                    leaf.left = entry.id;
                } else {
                    leaf.right = entry.id;
                }
            }
        }

        edit.fix_insert(entry.id, path)?;
        let root = edit.root;
        edit.write_all()?;

        *entry = self.ctx.directories().get(entry.id)?;
        if parent.child != root {
            parent.child = root;
            self.ctx.directories().write(&parent)?;
        }

        debug!("Added '{}' ({}) under entry {}", entry.name, entry.id, self.parent);
        Ok(())
    }

    /// Unlink record `id`, rebalance, and return it to the pool
    pub fn remove(&mut self, id: u32) -> Result<()> {
        let mut ordered: Vec<u32> = self.entries()?.into_iter().map(|e| e.id).collect();
        let position = ordered
            .iter()
            .position(|&child| child == id)
            .ok_or_else(|| CfbError::EntryNotFound(format!("directory entry {}", id)))?;
        ordered.remove(position);

        let red_depth = match ordered.len() {
            0 | 1 => None,
            n => Some(n.ilog2()),
        };
        let root = self.rebuild(&ordered, 0, red_depth)?;

        let mut parent = self.parent_entry()?;
        parent.child = root;
        self.ctx.directories().write(&parent)?;
        self.ctx.directories().recycle(id)?;

        debug!("Removed entry {} from under entry {}", id, self.parent);
        Ok(())
    }

    /// Write `ids` (sorted) as a balanced subtree and return its root
    ///
    /// Leaves on the deepest level are red, everything else black, which
    /// keeps every path at the same black height.
    fn rebuild(&mut self, ids: &[u32], depth: u32, red_depth: Option<u32>) -> Result<u32> {
        if ids.is_empty() {
            return Ok(NOSTREAM);
        }

        let mid = ids.len() / 2;
        let left = self.rebuild(&ids[..mid], depth + 1, red_depth)?;
        let right = self.rebuild(&ids[mid + 1..], depth + 1, red_depth)?;

        let mut node = self.ctx.directories().get(ids[mid])?;
        node.left = left;
        node.right = right;
        node.color = if red_depth == Some(depth) {
            Color::Red
        } else {
            Color::Black
        };
        self.ctx.directories().write(&node)?;
        Ok(node.id)
    }
}

/// Nodes touched by one insertion, written back together
struct TreeEdit<'c> {
    ctx: &'c mut IoContext,
    nodes: HashMap<u32, DirectoryEntry>,
    root: u32,
}

impl TreeEdit<'_> {
    fn node(&mut self, id: u32) -> Result<&mut DirectoryEntry> {
        if !self.nodes.contains_key(&id) {
            let entry = self.ctx.directories().get(id)?;
            self.nodes.insert(id, entry);
        }
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| CfbError::corruption(format!("tree node {} vanished", id)))
    }

    fn is_red(&mut self, id: u32) -> Result<bool> {
        if id == NOSTREAM {
            return Ok(false);
        }
        Ok(self.node(id)?.color == Color::Red)
    }

    fn set_color(&mut self, id: u32, color: Color) -> Result<()> {
        self.node(id)?.color = color;
        Ok(())
    }

    /// Point whichever link of `parent` held `old` at `new`
    fn replace_child(&mut self, parent: Option<u32>, old: u32, new: u32) -> Result<()> {
        match parent {
            None => self.root = new,
            Some(parent) => {
                let parent = self.node(parent)?;
                if parent.left == old {
                    parent.left = new;
                } else {
                    parent.right = new;
                }
            }
        }
        Ok(())
    }

    fn rotate_left(&mut self, id: u32, parent: Option<u32>) -> Result<()> {
        let pivot = self.node(id)?.right;
        let inner = self.node(pivot)?.left;
        self.node(id)?.right = inner;
        self.node(pivot)?.left = id;
        self.replace_child(parent, id, pivot)
    }

    fn rotate_right(&mut self, id: u32, parent: Option<u32>) -> Result<()> {
        let pivot = self.node(id)?.left;
        let inner = self.node(pivot)?.right;
        self.node(id)?.left = inner;
        self.node(pivot)?.right = id;
        self.replace_child(parent, id, pivot)
    }

    /// Restore the red-black properties after inserting red node `id`
    ///
    /// `path` holds the ancestors of `id`, root first.
    fn fix_insert(&mut self, mut id: u32, mut path: Vec<u32>) -> Result<()> {
        loop {
            let Some(&parent) = path.last() else {
                self.set_color(id, Color::Black)?;
                return Ok(());
            };
            if !self.is_red(parent)? {
                return Ok(());
            }

            // A red parent is never the root, so the grandparent exists
            let Some(&grandparent) = path.len().checked_sub(2).and_then(|i| path.get(i)) else {
                self.set_color(parent, Color::Black)?;
                return Ok(());
            };
            let great = path.len().checked_sub(3).map(|i| path[i]);
            let parent_is_left = self.node(grandparent)?.left == parent;
            let uncle = if parent_is_left {
                self.node(grandparent)?.right
            } else {
                self.node(grandparent)?.left
            };

            if self.is_red(uncle)? {
                self.set_color(parent, Color::Black)?;
                self.set_color(uncle, Color::Black)?;
                self.set_color(grandparent, Color::Red)?;
                id = grandparent;
                path.truncate(path.len() - 2);
                continue;
            }

            let mut top = parent;
            if parent_is_left {
                if self.node(parent)?.right == id {
                    self.rotate_left(parent, Some(grandparent))?;
                    top = id;
                }
                self.rotate_right(grandparent, great)?;
            } else {
                if self.node(parent)?.left == id {
                    self.rotate_right(parent, Some(grandparent))?;
                    top = id;
                }
                self.rotate_left(grandparent, great)?;
            }
            self.set_color(top, Color::Black)?;
            self.set_color(grandparent, Color::Red)?;
            return Ok(());
        }
    }

    fn write_all(self) -> Result<()> {
        let mut directories = self.ctx.directories();
        for node in self.nodes.values() {
            directories.write(node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::EntryType;
    use crate::options::CompoundFileBuilder;
    use std::io::Cursor;

    fn context() -> IoContext {
        let options = CompoundFileBuilder::new().create().options();
        IoContext::new(Box::new(Cursor::new(Vec::new())), options).unwrap()
    }

    fn insert(ctx: &mut IoContext, parent: u32, name: &str) -> u32 {
        let mut entry = ctx.directories().create_or_recycle().unwrap();
        entry.name = name.to_string();
        entry.entry_type = EntryType::Stream;
        DirectoryTree::new(ctx, parent).add(&mut entry).unwrap();
        entry.id
    }

    fn names(ctx: &mut IoContext, parent: u32) -> Vec<String> {
        DirectoryTree::new(ctx, parent)
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    /// Check red-black invariants and return the black height
    fn black_height(ctx: &mut IoContext, id: u32) -> usize {
        if id == NOSTREAM {
            return 1;
        }
        let node = ctx.directories().get(id).unwrap();
        for child in [node.left, node.right] {
            if node.color == Color::Red && child != NOSTREAM {
                assert_eq!(ctx.directories().get(child).unwrap().color, Color::Black);
            }
        }
        let left = black_height(ctx, node.left);
        let right = black_height(ctx, node.right);
        assert_eq!(left, right, "black height differs under '{}'", node.name);
        left + usize::from(node.color == Color::Black)
    }

    fn assert_valid(ctx: &mut IoContext, parent: u32) {
        let root = ctx.directories().get(parent).unwrap().child;
        if root != NOSTREAM {
            assert_eq!(ctx.directories().get(root).unwrap().color, Color::Black);
        }
        black_height(ctx, root);
    }

    #[test]
    fn test_lookup_and_order() {
        let mut ctx = context();
        for name in ["B", "a", "C"] {
            insert(&mut ctx, 0, name);
        }

        assert_eq!(names(&mut ctx, 0), vec!["a", "B", "C"]);
        for name in ["B", "a", "C"] {
            let found = DirectoryTree::new(&mut ctx, 0).try_get(name).unwrap();
            assert_eq!(found.unwrap().name, name);
        }
        assert!(DirectoryTree::new(&mut ctx, 0)
            .try_get("b")
            .unwrap()
            .is_none());
        assert_valid(&mut ctx, 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut ctx = context();
        insert(&mut ctx, 0, "dup");

        let mut entry = ctx.directories().create_or_recycle().unwrap();
        entry.name = "dup".into();
        entry.entry_type = EntryType::Stream;
        let result = DirectoryTree::new(&mut ctx, 0).add(&mut entry);
        assert!(matches!(result, Err(CfbError::EntryExists(_))));
    }

    #[test]
    fn test_remove_keeps_siblings() {
        let mut ctx = context();
        let mut ids = HashMap::new();
        for name in ["B", "a", "C"] {
            ids.insert(name, insert(&mut ctx, 0, name));
        }

        DirectoryTree::new(&mut ctx, 0).remove(ids["a"]).unwrap();
        assert_eq!(names(&mut ctx, 0), vec!["B", "C"]);
        assert!(DirectoryTree::new(&mut ctx, 0).try_get("B").unwrap().is_some());
        assert!(DirectoryTree::new(&mut ctx, 0).try_get("C").unwrap().is_some());
        assert!(DirectoryTree::new(&mut ctx, 0).try_get("a").unwrap().is_none());
        assert!(ctx.directories().get(ids["a"]).is_err());
        assert_valid(&mut ctx, 0);
    }

    #[test]
    fn test_many_inserts_stay_balanced() {
        let mut ctx = context();
        let mut expected = Vec::new();
        for i in 0..40 {
            let name = format!("item{:02}", (i * 17) % 40);
            insert(&mut ctx, 0, &name);
            expected.push(name);
            assert_valid(&mut ctx, 0);
        }

        expected.sort();
        assert_eq!(names(&mut ctx, 0), expected);
    }

    #[test]
    fn test_removals_stay_balanced() {
        let mut ctx = context();
        let ids: Vec<u32> = (0..20)
            .map(|i| insert(&mut ctx, 0, &format!("n{:02}", i)))
            .collect();

        for (i, id) in ids.iter().enumerate().filter(|(i, _)| i % 3 == 0) {
            DirectoryTree::new(&mut ctx, 0).remove(*id).unwrap();
            assert_valid(&mut ctx, 0);
            let name = format!("n{:02}", i);
            assert!(DirectoryTree::new(&mut ctx, 0)
                .try_get(&name)
                .unwrap()
                .is_none());
        }
        assert_eq!(names(&mut ctx, 0).len(), 13);
    }

    #[test]
    fn test_remove_last_child() {
        let mut ctx = context();
        let id = insert(&mut ctx, 0, "only");
        DirectoryTree::new(&mut ctx, 0).remove(id).unwrap();
        assert_eq!(ctx.directories().get(0).unwrap().child, NOSTREAM);
        assert!(names(&mut ctx, 0).is_empty());
    }
}
