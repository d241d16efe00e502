//! Immutable directory listings.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::host::{DirEntry, HostRef};
use crate::path;
use crate::stat::{ItemKind, Stat};

/// Snapshot of entries of one directory on one host.
///
/// Listings are never mutated after construction and are shared through `Arc`.
pub struct Listing {
    host: HostRef,
    directory: String,
    entries: Vec<DirEntry>,
}

impl Listing {
    /// Create a listing; `directory` gets a trailing slash if it lacks one.
    pub fn new(host: HostRef, directory: String, entries: Vec<DirEntry>) -> Self {
        Self {
            host,
            directory: path::ensure_trailing_slash(&directory),
            entries,
        }
    }

    pub fn host(&self) -> &HostRef {
        &self.host
    }

    /// Directory of the entries, with a trailing slash.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Handle to the entry at `index`.
    pub fn item(self: &Arc<Self>, index: usize) -> Option<ListingItem> {
        (index < self.entries.len()).then(|| ListingItem {
            listing: Arc::clone(self),
            index,
        })
    }

    /// Handles to every entry, in listing order.
    pub fn items(self: &Arc<Self>) -> impl Iterator<Item = ListingItem> + '_ {
        (0..self.entries.len()).map(move |index| ListingItem {
            listing: Arc::clone(self),
            index,
        })
    }
}

impl fmt::Debug for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listing")
            .field("host", &self.host.tag())
            .field("directory", &self.directory)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A cheap handle to one entry of a shared listing.
#[derive(Clone)]
pub struct ListingItem {
    listing: Arc<Listing>,
    index: usize,
}

impl ListingItem {
    fn entry(&self) -> &DirEntry {
        &self.listing.entries[self.index]
    }

    pub fn listing(&self) -> &Arc<Listing> {
        &self.listing
    }

    pub fn host(&self) -> &HostRef {
        &self.listing.host
    }

    pub fn filename(&self) -> &str {
        &self.entry().name
    }

    /// Parent directory, with a trailing slash.
    pub fn directory(&self) -> &str {
        &self.listing.directory
    }

    /// Absolute path of the item on its host.
    pub fn path(&self) -> String {
        path::join(&self.listing.directory, self.filename())
    }

    pub fn stat(&self) -> &Stat {
        &self.entry().stat
    }

    pub fn size(&self) -> u64 {
        self.entry().stat.size
    }

    pub fn unix_mode(&self) -> u32 {
        self.entry().stat.mode
    }

    pub fn kind(&self) -> ItemKind {
        self.entry().stat.kind()
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

    pub fn mtime(&self) -> Option<SystemTime> {
        self.entry().stat.mtime
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.entry().symlink_target.as_deref()
    }
}

impl fmt::Debug for ListingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingItem")
            .field("host", &self.host().tag())
            .field("path", &self.path())
            .field("kind", &self.kind())
            .field("size", &self.size())
            .finish()
    }
}
