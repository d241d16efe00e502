//! The flattened work list produced by a scan.

use std::sync::Arc;
use std::time::SystemTime;

use compact_str::CompactString;
use ferry_core::path;
use ferry_core::{HostRef, ItemKind, Stat, VfsError};
use indexmap::IndexSet;

/// One scanned source item.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Single path component.
    pub name: CompactString,
    /// Index of the directory item holding this one; `None` for top-level items.
    pub parent: Option<usize>,
    /// Index into [`SourceItems::base_dir`].
    pub base_dir: usize,
    /// Index into [`SourceItems::host`].
    pub host: usize,
    pub size: u64,
    pub mode: u32,
    pub dev: u64,
    pub ino: u64,
    pub mtime: Option<SystemTime>,
    pub symlink_target: Option<String>,
}

impl SourceItem {
    pub fn kind(&self) -> ItemKind {
        ItemKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind() == ItemKind::Directory
    }

    pub fn is_reg(&self) -> bool {
        self.kind() == ItemKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind() == ItemKind::Symlink
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// The metadata this item was recorded with.
    pub fn stat(&self) -> Stat {
        Stat {
            size: self.size,
            mode: self.mode,
            dev: self.dev,
            ino: self.ino,
            mtime: self.mtime,
        }
    }
}

/// A directory whose contents were left out of the scan.
#[derive(Debug)]
pub struct ScanSkip {
    pub path: String,
    pub error: VfsError,
}

/// Ordered scan result.
///
/// Every directory precedes its descendants, and relative paths are unique.
#[derive(Debug, Default)]
pub struct SourceItems {
    items: Vec<SourceItem>,
    base_dirs: IndexSet<String>,
    hosts: Vec<HostRef>,
    /// Directories skipped while scanning, not yet reported.
    skipped: Vec<ScanSkip>,
    total_bytes: u64,
    files: u64,
    directories: u64,
    symlinks: u64,
}

impl SourceItems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SourceItem> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceItem> {
        self.items.iter()
    }

    /// Intern a host, returning its index.
    pub fn insert_host(&mut self, host: &HostRef) -> usize {
        if let Some(idx) = self
            .hosts
            .iter()
            .position(|h| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(host)))
        {
            return idx;
        }
        self.hosts.push(host.clone());
        self.hosts.len() - 1
    }

    /// Intern a base directory (with trailing slash), returning its index.
    pub fn insert_base_dir(&mut self, dir: &str) -> usize {
        let (idx, _) = self.base_dirs.insert_full(path::ensure_trailing_slash(dir));
        idx
    }

    pub fn host(&self, index: usize) -> &HostRef {
        &self.hosts[self.items[index].host]
    }

    pub fn hosts(&self) -> &[HostRef] {
        &self.hosts
    }

    pub fn base_dir(&self, index: usize) -> &str {
        self.base_dirs
            .get_index(self.items[index].base_dir)
            .map_or("/", String::as_str)
    }

    /// Append an item and update the totals.
    pub fn push(&mut self, item: SourceItem) -> usize {
        self.account(&item);
        self.items.push(item);
        self.items.len() - 1
    }

    fn account(&mut self, item: &SourceItem) {
        match item.kind() {
            ItemKind::File => {
                self.files += 1;
                self.total_bytes += item.size;
            }
            ItemKind::Directory => self.directories += 1,
            ItemKind::Symlink => self.symlinks += 1,
            ItemKind::Other => {}
        }
    }

    /// Insert `subtree` right after `at`.
    ///
    /// Parent indices inside `subtree` must already be absolute, computed as if the
    /// first subtree item lands at `at + 1`. Indices of later items are shifted.
    pub fn splice_after(&mut self, at: usize, subtree: Vec<SourceItem>) {
        let shift = subtree.len();
        if shift == 0 {
            return;
        }
        for item in &subtree {
            self.account(item);
        }
        for item in self.items.iter_mut().skip(at + 1) {
            if let Some(parent) = item.parent.as_mut() {
                if *parent > at {
                    *parent += shift;
                }
            }
        }
        let tail = self.items.split_off(at + 1);
        self.items.extend(subtree);
        self.items.extend(tail);
    }

    pub fn record_skip(&mut self, skip: ScanSkip) {
        self.skipped.push(skip);
    }

    /// Directories skipped since the last call.
    pub fn take_skipped(&mut self) -> Vec<ScanSkip> {
        std::mem::take(&mut self.skipped)
    }

    /// Path relative to the item's base directory, e.g. `"dir/sub/file.txt"`.
    pub fn compose_relative_path(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut current = Some(index);
        while let Some(idx) = current {
            let item = &self.items[idx];
            parts.push(item.name.as_str());
            current = item.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Full path of the item on its host.
    pub fn source_path(&self, index: usize) -> String {
        path::join(self.base_dir(index), &self.compose_relative_path(index))
    }

    /// Index of the top-level item this item descends from.
    pub fn top_level_of(&self, index: usize) -> usize {
        let mut current = index;
        while let Some(parent) = self.items[current].parent {
            current = parent;
        }
        current
    }

    /// Total bytes of regular files.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn files_count(&self) -> u64 {
        self.files
    }

    pub fn directories_count(&self) -> u64 {
        self.directories
    }

    pub fn symlinks_count(&self) -> u64 {
        self.symlinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{S_IFDIR, S_IFREG};

    fn item(name: &str, parent: Option<usize>, mode: u32, size: u64) -> SourceItem {
        SourceItem {
            name: name.into(),
            parent,
            base_dir: 0,
            host: 0,
            size,
            mode,
            dev: 0,
            ino: 0,
            mtime: None,
            symlink_target: None,
        }
    }

    #[test]
    fn test_relative_paths_and_totals() {
        let mut db = SourceItems::new();
        db.insert_base_dir("/src");
        db.push(item("top", None, S_IFDIR | 0o755, 0));
        db.push(item("a.txt", Some(0), S_IFREG | 0o644, 10));
        db.push(item("sub", Some(0), S_IFDIR | 0o755, 0));
        db.push(item("b.txt", Some(2), S_IFREG | 0o644, 5));

        assert_eq!(db.compose_relative_path(3), "top/sub/b.txt");
        assert_eq!(db.source_path(3), "/src/top/sub/b.txt");
        assert_eq!(db.total_bytes(), 15);
        assert_eq!(db.files_count(), 2);
        assert_eq!(db.directories_count(), 2);
        assert_eq!(db.top_level_of(3), 0);
    }

    #[test]
    fn test_splice_shifts_later_parents() {
        let mut db = SourceItems::new();
        db.insert_base_dir("/");
        db.push(item("d1", None, S_IFDIR | 0o755, 0));
        db.push(item("d2", None, S_IFDIR | 0o755, 0));
        db.push(item("in2", Some(1), S_IFREG | 0o644, 1));

        db.splice_after(0, vec![item("in1", Some(0), S_IFREG | 0o644, 2)]);

        assert_eq!(db.len(), 4);
        assert_eq!(db.compose_relative_path(1), "d1/in1");
        assert_eq!(db.compose_relative_path(3), "d2/in2");
        assert_eq!(db.total_bytes(), 3);
    }
}
