//! The capability interface implemented by every filesystem backend.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{VfsError, VfsErrorKind, VfsResult};
use crate::listing::Listing;
use crate::path;
use crate::path_stack::PathStack;
use crate::stat::{FsStats, OpenFlags, Stat, StatFlags};

/// Shared handle to a host. Hosts outlive jobs and are shared between them.
pub type HostRef = Arc<dyn Host>;

/// One directory entry as produced by `Host::read_directory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: CompactString,
    pub stat: Stat,
    /// Link target for symlinks.
    pub symlink_target: Option<String>,
}

impl DirEntry {
    pub fn new(name: impl Into<CompactString>, stat: Stat) -> Self {
        Self {
            name: name.into(),
            stat,
            symlink_target: None,
        }
    }

    pub fn with_symlink_target(mut self, target: impl Into<String>) -> Self {
        self.symlink_target = Some(target.into());
        self
    }
}

/// Structural configuration of a host, used for weak equality of mounts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostOptions(BTreeMap<String, String>);

impl HostOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key/value pair.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// A filesystem backend: native disk, archive, memory, network.
///
/// Paths are absolute `/`-separated strings relative to the host's own root.
/// Every call accepts a cancellation token that long-running backends poll.
pub trait Host: Send + Sync + fmt::Debug {
    /// Filesystem tag, e.g. `"native"` or `"arc"`.
    fn tag(&self) -> &'static str;

    /// Path of this host inside its parent host (empty for root hosts).
    fn junction_path(&self) -> &str {
        ""
    }

    /// The host this one is mounted on.
    fn parent(&self) -> Option<&HostRef> {
        None
    }

    /// Structural options compared by `PathStack::weak_equal`.
    fn options(&self) -> Option<HostOptions> {
        None
    }

    /// Whether paths of this host are paths of the local operating system.
    fn is_native(&self) -> bool {
        false
    }

    fn is_writable(&self) -> bool;

    fn stat(&self, path: &str, flags: StatFlags, cancel: &CancellationToken) -> VfsResult<Stat>;

    /// List the entries of a directory, without `.` and `..`.
    fn read_directory(&self, path: &str, cancel: &CancellationToken) -> VfsResult<Vec<DirEntry>>;

    /// Create an unopened file object; call `VfsFile::open` before use.
    fn create_file(&self, path: &str, cancel: &CancellationToken) -> VfsResult<Box<dyn VfsFile>>;

    fn statfs(&self, path: &str, cancel: &CancellationToken) -> VfsResult<FsStats>;

    fn create_directory(&self, path: &str, _mode: u32, _cancel: &CancellationToken) -> VfsResult<()> {
        Err(self.unsupported(path))
    }

    fn read_symlink(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<String> {
        Err(VfsError::new(VfsErrorKind::NotSupported, path))
    }

    fn create_symlink(&self, path: &str, _target: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        Err(self.unsupported(path))
    }

    fn unlink(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        Err(self.unsupported(path))
    }

    fn remove_directory(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        Err(self.unsupported(path))
    }

    fn rename(&self, old_path: &str, _new_path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        Err(self.unsupported(old_path))
    }

    fn set_permissions(&self, path: &str, _mode: u32, _cancel: &CancellationToken) -> VfsResult<()> {
        Err(VfsError::new(VfsErrorKind::NotSupported, path))
    }

    fn set_modification_time(
        &self,
        path: &str,
        _mtime: SystemTime,
        _cancel: &CancellationToken,
    ) -> VfsResult<()> {
        Err(VfsError::new(VfsErrorKind::NotSupported, path))
    }

    fn exists(&self, path: &str, cancel: &CancellationToken) -> bool {
        self.stat(path, StatFlags::NO_FOLLOW, cancel).is_ok()
    }

    fn is_directory(&self, path: &str, cancel: &CancellationToken) -> bool {
        self.stat(path, StatFlags::empty(), cancel)
            .map(|st| st.is_dir())
            .unwrap_or(false)
    }

    /// Error used by mutating defaults: read-only hosts report `ReadOnly`.
    fn unsupported(&self, path: &str) -> VfsError {
        let kind = if self.is_writable() {
            VfsErrorKind::NotSupported
        } else {
            VfsErrorKind::ReadOnly
        };
        VfsError::new(kind, path)
    }
}

/// A file object of some host.
pub trait VfsFile: Send + fmt::Debug {
    fn path(&self) -> &str;

    fn open(&mut self, flags: OpenFlags, cancel: &CancellationToken) -> VfsResult<()>;

    fn is_opened(&self) -> bool;

    /// Read up to `buf.len()` bytes; `Ok(0)` means end of file.
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize>;

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize>;

    /// Move the file position to an absolute offset.
    fn seek(&mut self, offset: u64) -> VfsResult<u64>;

    fn size(&self) -> VfsResult<u64>;

    /// Extended attributes of the file.
    fn xattrs(&mut self) -> VfsResult<Vec<(String, Vec<u8>)>> {
        Ok(Vec::new())
    }

    fn set_xattr(&mut self, _name: &str, _value: &[u8]) -> VfsResult<()> {
        Err(VfsError::new(VfsErrorKind::NotSupported, self.path()))
    }

    fn close(&mut self) -> VfsResult<()>;

    /// Write the whole buffer, retrying short writes.
    fn write_all(&mut self, mut buf: &[u8]) -> VfsResult<()> {
        while !buf.is_empty() {
            let written = self.write(buf)?;
            if written == 0 {
                return Err(VfsError::new(VfsErrorKind::Io, self.path()));
            }
            buf = &buf[written..];
        }
        Ok(())
    }

    /// Fill as much of `buf` as possible; returns fewer bytes only at end of file.
    fn read_full(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Higher-level operations built on top of the `Host` capabilities.
pub trait HostExt {
    /// Fetch a sorted listing of a directory.
    fn fetch_directory_listing(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<Arc<Listing>>;

    /// Fetch a listing holding exactly the item at `path`.
    fn fetch_single_item_listing(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<Arc<Listing>>;

    /// Create `path` and every missing ancestor.
    fn create_directory_all(&self, path: &str, mode: u32, cancel: &CancellationToken)
    -> VfsResult<()>;

    /// The mount chain of this host together with `path`.
    fn path_stack(&self, path: &str) -> PathStack;

    /// Identity comparison of two host handles.
    fn is_same_host(&self, other: &HostRef) -> bool;
}

impl HostExt for HostRef {
    fn fetch_directory_listing(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<Arc<Listing>> {
        if !path::is_absolute(path) {
            return Err(VfsError::new(VfsErrorKind::InvalidPath, path));
        }
        let mut entries = self.read_directory(path, cancel)?;
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Ok(Arc::new(Listing::new(
            self.clone(),
            path::ensure_trailing_slash(path),
            entries,
        )))
    }

    fn fetch_single_item_listing(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<Arc<Listing>> {
        if !path::is_absolute(path) {
            return Err(VfsError::new(VfsErrorKind::InvalidPath, path));
        }
        let path = path::trim_trailing_slashes(path);
        let Some(directory) = path::parent(path) else {
            return Err(VfsError::new(VfsErrorKind::InvalidPath, path));
        };

        let stat = self.stat(path, StatFlags::NO_FOLLOW, cancel)?;
        let mut entry = DirEntry::new(path::file_name(path), stat);
        if stat.is_symlink() {
            entry.symlink_target = self.read_symlink(path, cancel).ok();
        }

        Ok(Arc::new(Listing::new(
            self.clone(),
            directory.to_string(),
            vec![entry],
        )))
    }

    fn create_directory_all(
        &self,
        path: &str,
        mode: u32,
        cancel: &CancellationToken,
    ) -> VfsResult<()> {
        let mut current = String::from("/");
        for component in path::components(path) {
            if cancel.is_cancelled() {
                return Err(VfsError::cancelled(path));
            }
            current = path::join(&current, component);
            match self.stat(&current, StatFlags::empty(), cancel) {
                Ok(st) if st.is_dir() => continue,
                Ok(_) => return Err(VfsError::new(VfsErrorKind::NotADirectory, current)),
                Err(e) if e.is_not_found() => match self.create_directory(&current, mode, cancel) {
                    Ok(()) => {}
                    Err(e) if e.kind() == VfsErrorKind::AlreadyExists => {}
                    Err(e) => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn path_stack(&self, path: &str) -> PathStack {
        PathStack::new(self, path)
    }

    fn is_same_host(&self, other: &HostRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(self), Arc::as_ptr(other))
    }
}
