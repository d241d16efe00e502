//! In-memory host.
//!
//! `MemHost` keeps a whole tree in a map keyed by normalized path. It honors the
//! owner read/write permission bits so that access failures can be produced
//! without touching a real disk, and it can be configured case-insensitive to
//! behave like the default volumes of some desktop systems.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use compact_str::CompactString;
use ferry_core::path;
use ferry_core::{
    CancellationToken, DirEntry, FsStats, Host, HostOptions, HostRef, ItemKind, OpenFlags, Stat,
    StatFlags, VfsError, VfsErrorKind, VfsFile, VfsResult,
};
use parking_lot::RwLock;
use tracing::trace;

const OWNER_READ: u32 = 0o400;
const OWNER_WRITE: u32 = 0o200;
const MAX_SYMLINK_HOPS: usize = 16;

/// Volume ids handed out to memory hosts, far from real device numbers.
static NEXT_VOLUME: AtomicU64 = AtomicU64::new(0x4d45_4d00_0000_0001);

#[derive(Debug, Clone)]
enum NodeData {
    File(Vec<u8>),
    Directory,
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Node {
    /// Display name, preserving case on case-insensitive hosts.
    name: CompactString,
    data: NodeData,
    permissions: u32,
    ino: u64,
    mtime: SystemTime,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl Node {
    fn kind(&self) -> ItemKind {
        match self.data {
            NodeData::File(_) => ItemKind::File,
            NodeData::Directory => ItemKind::Directory,
            NodeData::Symlink(_) => ItemKind::Symlink,
        }
    }

    fn size(&self) -> u64 {
        match &self.data {
            NodeData::File(bytes) => bytes.len() as u64,
            NodeData::Symlink(target) => target.len() as u64,
            NodeData::Directory => 0,
        }
    }
}

#[derive(Debug)]
struct MemInner {
    nodes: RwLock<BTreeMap<String, Node>>,
    next_ino: AtomicU64,
    volume_id: u64,
    case_sensitive: bool,
    capacity: AtomicU64,
}

impl MemInner {
    fn key(&self, p: &str) -> String {
        let trimmed = path::trim_trailing_slashes(p);
        if self.case_sensitive {
            trimmed.to_string()
        } else {
            trimmed.to_lowercase()
        }
    }

    fn used_bytes(nodes: &BTreeMap<String, Node>) -> u64 {
        nodes
            .values()
            .map(|n| match &n.data {
                NodeData::File(bytes) => bytes.len() as u64,
                _ => 0,
            })
            .sum()
    }

    fn new_node(&self, p: &str, data: NodeData, permissions: u32) -> Node {
        Node {
            name: path::file_name(p).into(),
            data,
            permissions,
            ino: self.next_ino.fetch_add(1, Ordering::Relaxed),
            mtime: SystemTime::now(),
            xattrs: BTreeMap::new(),
        }
    }

    /// Check that the parent of `p` is an existing, writable directory.
    fn check_parent_writable(&self, nodes: &BTreeMap<String, Node>, p: &str) -> VfsResult<()> {
        let Some(parent) = path::parent(p) else {
            return Err(VfsError::new(VfsErrorKind::InvalidPath, p));
        };
        match nodes.get(&self.key(parent)) {
            None => Err(VfsError::new(VfsErrorKind::NotFound, p)),
            Some(node) if node.kind() != ItemKind::Directory => {
                Err(VfsError::new(VfsErrorKind::NotADirectory, p))
            }
            Some(node) if node.permissions & OWNER_WRITE == 0 => {
                Err(VfsError::new(VfsErrorKind::PermissionDenied, p))
            }
            Some(_) => Ok(()),
        }
    }

    /// Resolve symlinks until a non-link key is reached.
    fn follow(&self, nodes: &BTreeMap<String, Node>, p: &str) -> VfsResult<String> {
        let mut current = path::trim_trailing_slashes(p).to_string();
        for _ in 0..MAX_SYMLINK_HOPS {
            let node = nodes
                .get(&self.key(&current))
                .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, p))?;
            match &node.data {
                NodeData::Symlink(target) if path::is_absolute(target) => {
                    current = target.clone();
                }
                NodeData::Symlink(target) => {
                    let dir = path::parent(&current).unwrap_or("/");
                    current = path::join(dir, target);
                }
                _ => return Ok(current),
            }
        }
        Err(VfsError::new(VfsErrorKind::Io, p))
    }

    fn stat_node(&self, node: &Node) -> Stat {
        Stat {
            dev: self.volume_id,
            ino: node.ino,
            mtime: Some(node.mtime),
            ..Stat::new(node.kind(), node.permissions, node.size())
        }
    }
}

/// A writable host whose whole tree lives in memory.
#[derive(Debug, Clone)]
pub struct MemHost {
    inner: Arc<MemInner>,
}

impl MemHost {
    /// Create an empty, case-sensitive host holding only `/`.
    pub fn new() -> Self {
        Self::with_case_sensitivity(true)
    }

    /// Create an empty host that matches names ignoring case.
    pub fn case_insensitive() -> Self {
        Self::with_case_sensitivity(false)
    }

    fn with_case_sensitivity(case_sensitive: bool) -> Self {
        let inner = MemInner {
            nodes: RwLock::new(BTreeMap::new()),
            next_ino: AtomicU64::new(2),
            volume_id: NEXT_VOLUME.fetch_add(1, Ordering::Relaxed),
            case_sensitive,
            capacity: AtomicU64::new(u64::MAX),
        };
        let root = Node {
            name: CompactString::from("/"),
            data: NodeData::Directory,
            permissions: 0o755,
            ino: 1,
            mtime: SystemTime::now(),
            xattrs: BTreeMap::new(),
        };
        inner.nodes.write().insert("/".to_string(), root);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn shared(self) -> HostRef {
        Arc::new(self)
    }

    /// Limit the number of file bytes the host can hold.
    pub fn set_capacity(&self, bytes: u64) {
        self.inner.capacity.store(bytes, Ordering::Relaxed);
    }

    /// Create a file with `content`, creating missing parent directories.
    pub fn add_file(&self, p: &str, content: impl Into<Vec<u8>>) -> VfsResult<()> {
        self.add_dirs(path::parent(p).unwrap_or("/"))?;
        let mut nodes = self.inner.nodes.write();
        let node = self
            .inner
            .new_node(p, NodeData::File(content.into()), 0o644);
        nodes.insert(self.inner.key(p), node);
        Ok(())
    }

    /// Create a directory and its missing parents.
    pub fn add_dirs(&self, p: &str) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let mut current = String::from("/");
        for component in path::components(p) {
            current = path::join(&current, component);
            let key = self.inner.key(&current);
            match nodes.get(&key) {
                Some(node) if node.kind() == ItemKind::Directory => {}
                Some(_) => return Err(VfsError::new(VfsErrorKind::NotADirectory, current)),
                None => {
                    let node = self.inner.new_node(&current, NodeData::Directory, 0o755);
                    nodes.insert(key, node);
                }
            }
        }
        Ok(())
    }

    /// Create a symlink, creating missing parent directories.
    pub fn add_symlink(&self, p: &str, target: &str) -> VfsResult<()> {
        self.add_dirs(path::parent(p).unwrap_or("/"))?;
        let mut nodes = self.inner.nodes.write();
        let node = self
            .inner
            .new_node(p, NodeData::Symlink(target.to_string()), 0o777);
        nodes.insert(self.inner.key(p), node);
        Ok(())
    }

    /// Whole content of a regular file.
    pub fn read_file(&self, p: &str) -> VfsResult<Vec<u8>> {
        let nodes = self.inner.nodes.read();
        match nodes.get(&self.inner.key(p)).map(|n| &n.data) {
            Some(NodeData::File(bytes)) => Ok(bytes.clone()),
            Some(_) => Err(VfsError::new(VfsErrorKind::IsADirectory, p)),
            None => Err(VfsError::new(VfsErrorKind::NotFound, p)),
        }
    }

    /// Overwrite permission bits without any access checks.
    pub fn set_mode(&self, p: &str, permissions: u32) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let node = nodes
            .get_mut(&self.inner.key(p))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, p))?;
        node.permissions = permissions & ferry_core::PERMISSION_MASK;
        Ok(())
    }

    /// Names of every item, in key order. Handy for assertions.
    pub fn paths(&self) -> Vec<String> {
        self.inner.nodes.read().keys().cloned().collect()
    }
}

impl Default for MemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for MemHost {
    fn tag(&self) -> &'static str {
        "mem"
    }

    fn options(&self) -> Option<HostOptions> {
        Some(HostOptions::new().with("case_sensitive", self.inner.case_sensitive.to_string()))
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn stat(&self, p: &str, flags: StatFlags, cancel: &CancellationToken) -> VfsResult<Stat> {
        if cancel.is_cancelled() {
            return Err(VfsError::cancelled(p));
        }
        let nodes = self.inner.nodes.read();
        let key = if flags.contains(StatFlags::NO_FOLLOW) {
            self.inner.key(p)
        } else {
            let resolved = self.inner.follow(&nodes, p)?;
            self.inner.key(&resolved)
        };
        nodes
            .get(&key)
            .map(|n| self.inner.stat_node(n))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, p))
    }

    fn read_directory(&self, p: &str, cancel: &CancellationToken) -> VfsResult<Vec<DirEntry>> {
        let nodes = self.inner.nodes.read();
        let resolved = self.inner.follow(&nodes, p)?;
        let key = self.inner.key(&resolved);
        match nodes.get(&key) {
            Some(node) if node.kind() != ItemKind::Directory => {
                return Err(VfsError::new(VfsErrorKind::NotADirectory, p));
            }
            Some(node) if node.permissions & OWNER_READ == 0 => {
                return Err(VfsError::new(VfsErrorKind::PermissionDenied, p));
            }
            Some(_) => {}
            None => return Err(VfsError::new(VfsErrorKind::NotFound, p)),
        }

        let prefix = path::ensure_trailing_slash(&key);
        let mut entries = Vec::new();
        for (child_key, node) in nodes.range(prefix.clone()..) {
            if cancel.is_cancelled() {
                return Err(VfsError::cancelled(p));
            }
            let Some(rest) = child_key.strip_prefix(&prefix) else {
                break;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let mut entry = DirEntry::new(node.name.clone(), self.inner.stat_node(node));
            if let NodeData::Symlink(target) = &node.data {
                entry = entry.with_symlink_target(target.clone());
            }
            entries.push(entry);
        }
        trace!(path = p, count = entries.len(), "Read memory directory");
        Ok(entries)
    }

    fn create_file(&self, p: &str, _cancel: &CancellationToken) -> VfsResult<Box<dyn VfsFile>> {
        Ok(Box::new(MemFile {
            inner: Arc::clone(&self.inner),
            path: p.to_string(),
            position: 0,
            flags: None,
        }))
    }

    fn statfs(&self, _p: &str, _cancel: &CancellationToken) -> VfsResult<FsStats> {
        let nodes = self.inner.nodes.read();
        let capacity = self.inner.capacity.load(Ordering::Relaxed);
        let used = MemInner::used_bytes(&nodes);
        let free = capacity.saturating_sub(used);
        Ok(FsStats {
            volume_id: self.inner.volume_id,
            total_bytes: capacity,
            free_bytes: free,
            avail_bytes: free,
            volume_name: "memory".to_string(),
            case_sensitive: self.inner.case_sensitive,
        })
    }

    fn create_directory(&self, p: &str, mode: u32, _cancel: &CancellationToken) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let key = self.inner.key(p);
        if nodes.contains_key(&key) {
            return Err(VfsError::new(VfsErrorKind::AlreadyExists, p));
        }
        self.inner.check_parent_writable(&nodes, p)?;
        let node = self.inner.new_node(
            path::trim_trailing_slashes(p),
            NodeData::Directory,
            mode & ferry_core::PERMISSION_MASK,
        );
        nodes.insert(key, node);
        Ok(())
    }

    fn read_symlink(&self, p: &str, _cancel: &CancellationToken) -> VfsResult<String> {
        let nodes = self.inner.nodes.read();
        match nodes.get(&self.inner.key(p)).map(|n| &n.data) {
            Some(NodeData::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(VfsError::new(VfsErrorKind::InvalidPath, p)),
            None => Err(VfsError::new(VfsErrorKind::NotFound, p)),
        }
    }

    fn create_symlink(&self, p: &str, target: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let key = self.inner.key(p);
        if nodes.contains_key(&key) {
            return Err(VfsError::new(VfsErrorKind::AlreadyExists, p));
        }
        self.inner.check_parent_writable(&nodes, p)?;
        let node = self
            .inner
            .new_node(p, NodeData::Symlink(target.to_string()), 0o777);
        nodes.insert(key, node);
        Ok(())
    }

    fn unlink(&self, p: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let key = self.inner.key(p);
        match nodes.get(&key) {
            None => return Err(VfsError::new(VfsErrorKind::NotFound, p)),
            Some(node) if node.kind() == ItemKind::Directory => {
                return Err(VfsError::new(VfsErrorKind::IsADirectory, p));
            }
            Some(_) => {}
        }
        self.inner.check_parent_writable(&nodes, p)?;
        nodes.remove(&key);
        Ok(())
    }

    fn remove_directory(&self, p: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let key = self.inner.key(p);
        match nodes.get(&key) {
            None => return Err(VfsError::new(VfsErrorKind::NotFound, p)),
            Some(node) if node.kind() != ItemKind::Directory => {
                return Err(VfsError::new(VfsErrorKind::NotADirectory, p));
            }
            Some(_) => {}
        }
        if key == "/" {
            return Err(VfsError::new(VfsErrorKind::InvalidPath, p));
        }
        let prefix = path::ensure_trailing_slash(&key);
        if nodes.range(prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&prefix)) {
            return Err(VfsError::new(VfsErrorKind::DirectoryNotEmpty, p));
        }
        self.inner.check_parent_writable(&nodes, p)?;
        nodes.remove(&key);
        Ok(())
    }

    fn rename(&self, old_path: &str, new_path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let old_key = self.inner.key(old_path);
        let new_key = self.inner.key(new_path);
        let Some(source) = nodes.get(&old_key) else {
            return Err(VfsError::new(VfsErrorKind::NotFound, old_path));
        };
        let source_is_dir = source.kind() == ItemKind::Directory;
        if source_is_dir && path::is_within(&new_key, &old_key) && new_key != old_key {
            return Err(VfsError::new(VfsErrorKind::InvalidPath, new_path));
        }
        self.inner.check_parent_writable(&nodes, old_path)?;
        self.inner.check_parent_writable(&nodes, new_path)?;

        if new_key != old_key {
            if let Some(existing) = nodes.get(&new_key) {
                let existing_is_dir = existing.kind() == ItemKind::Directory;
                if existing_is_dir != source_is_dir {
                    let kind = if existing_is_dir {
                        VfsErrorKind::IsADirectory
                    } else {
                        VfsErrorKind::NotADirectory
                    };
                    return Err(VfsError::new(kind, new_path));
                }
                let prefix = path::ensure_trailing_slash(&new_key);
                if existing_is_dir && nodes.keys().any(|k| k.starts_with(&prefix)) {
                    return Err(VfsError::new(VfsErrorKind::DirectoryNotEmpty, new_path));
                }
                nodes.remove(&new_key);
            }
        }

        let old_prefix = path::ensure_trailing_slash(&old_key);
        let moved: Vec<String> = nodes
            .keys()
            .filter(|k| **k == old_key || k.starts_with(&old_prefix))
            .cloned()
            .collect();
        for key in moved {
            let Some(mut node) = nodes.remove(&key) else {
                continue;
            };
            let target = format!("{new_key}{}", &key[old_key.len()..]);
            if key == old_key {
                node.name = path::file_name(new_path).into();
            }
            nodes.insert(target, node);
        }
        Ok(())
    }

    fn set_permissions(&self, p: &str, mode: u32, _cancel: &CancellationToken) -> VfsResult<()> {
        self.set_mode(p, mode)
    }

    fn set_modification_time(
        &self,
        p: &str,
        mtime: SystemTime,
        _cancel: &CancellationToken,
    ) -> VfsResult<()> {
        let mut nodes = self.inner.nodes.write();
        let node = nodes
            .get_mut(&self.inner.key(p))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, p))?;
        node.mtime = mtime;
        Ok(())
    }
}

/// File handle of a [`MemHost`].
#[derive(Debug)]
pub struct MemFile {
    inner: Arc<MemInner>,
    path: String,
    position: u64,
    flags: Option<OpenFlags>,
}

impl MemFile {
    fn opened_flags(&self) -> VfsResult<OpenFlags> {
        self.flags
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotOpened, &self.path))
    }

    fn with_node<T>(&self, f: impl FnOnce(&Node) -> VfsResult<T>) -> VfsResult<T> {
        let nodes = self.inner.nodes.read();
        let node = nodes
            .get(&self.inner.key(&self.path))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, &self.path))?;
        f(node)
    }
}

impl VfsFile for MemFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self, flags: OpenFlags, cancel: &CancellationToken) -> VfsResult<()> {
        if cancel.is_cancelled() {
            return Err(VfsError::cancelled(&self.path));
        }
        let mut nodes = self.inner.nodes.write();
        let key = self.inner.key(&self.path);
        let writing = flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND);

        match nodes.get_mut(&key) {
            Some(node) => {
                if flags.contains(OpenFlags::NO_EXIST) {
                    return Err(VfsError::new(VfsErrorKind::AlreadyExists, &self.path));
                }
                let NodeData::File(bytes) = &mut node.data else {
                    return Err(VfsError::new(VfsErrorKind::IsADirectory, &self.path));
                };
                if flags.contains(OpenFlags::READ) && node.permissions & OWNER_READ == 0 {
                    return Err(VfsError::new(VfsErrorKind::PermissionDenied, &self.path));
                }
                if writing && node.permissions & OWNER_WRITE == 0 {
                    return Err(VfsError::new(VfsErrorKind::PermissionDenied, &self.path));
                }
                if writing && flags.contains(OpenFlags::TRUNCATE) {
                    bytes.clear();
                }
                self.position = if flags.contains(OpenFlags::APPEND) {
                    bytes.len() as u64
                } else {
                    0
                };
            }
            None => {
                if !flags.intersects(OpenFlags::CREATE | OpenFlags::NO_EXIST) {
                    return Err(VfsError::new(VfsErrorKind::NotFound, &self.path));
                }
                self.inner.check_parent_writable(&nodes, &self.path)?;
                let node = self
                    .inner
                    .new_node(&self.path, NodeData::File(Vec::new()), 0o644);
                nodes.insert(key, node);
                self.position = 0;
            }
        }
        self.flags = Some(flags);
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.flags.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if !self.opened_flags()?.contains(OpenFlags::READ) {
            return Err(VfsError::new(VfsErrorKind::NotOpened, &self.path));
        }
        let position = self.position as usize;
        let n = self.with_node(|node| match &node.data {
            NodeData::File(bytes) => {
                // Reading past the end yields nothing.
                let tail = bytes.get(position..).unwrap_or_default();
                let n = tail.len().min(buf.len());
                buf[..n].copy_from_slice(&tail[..n]);
                Ok(n)
            }
            _ => Err(VfsError::new(VfsErrorKind::IsADirectory, &self.path)),
        })?;
        self.position += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        if !self
            .opened_flags()?
            .intersects(OpenFlags::WRITE | OpenFlags::APPEND)
        {
            return Err(VfsError::new(VfsErrorKind::NotOpened, &self.path));
        }
        let mut nodes = self.inner.nodes.write();
        let used = MemInner::used_bytes(&nodes);
        let capacity = self.inner.capacity.load(Ordering::Relaxed);
        let node = nodes
            .get_mut(&self.inner.key(&self.path))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, &self.path))?;
        let NodeData::File(bytes) = &mut node.data else {
            return Err(VfsError::new(VfsErrorKind::IsADirectory, &self.path));
        };

        let start = self.position as usize;
        let end = start + buf.len();
        let growth = end.saturating_sub(bytes.len()) as u64;
        if used.saturating_add(growth) > capacity {
            return Err(VfsError::new(VfsErrorKind::NoSpace, &self.path));
        }
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[start..end].copy_from_slice(buf);
        node.mtime = SystemTime::now();
        self.position = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, offset: u64) -> VfsResult<u64> {
        self.opened_flags()?;
        self.position = offset;
        Ok(offset)
    }

    fn size(&self) -> VfsResult<u64> {
        self.opened_flags()?;
        self.with_node(|node| Ok(node.size()))
    }

    fn xattrs(&mut self) -> VfsResult<Vec<(String, Vec<u8>)>> {
        self.opened_flags()?;
        self.with_node(|node| {
            Ok(node
                .xattrs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        })
    }

    fn set_xattr(&mut self, name: &str, value: &[u8]) -> VfsResult<()> {
        self.opened_flags()?;
        let mut nodes = self.inner.nodes.write();
        let node = nodes
            .get_mut(&self.inner.key(&self.path))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, &self.path))?;
        node.xattrs.insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn close(&mut self) -> VfsResult<()> {
        self.flags = None;
        self.position = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn test_write_then_read_back() {
        let host = MemHost::new();
        host.add_dirs("/dir").unwrap();

        let mut file = host.create_file("/dir/a.bin", &cancel()).unwrap();
        file.open(OpenFlags::WRITE | OpenFlags::CREATE, &cancel()).unwrap();
        file.write_all(b"hello").unwrap();
        file.close().unwrap();

        assert_eq!(host.read_file("/dir/a.bin").unwrap(), b"hello");
        let stat = host.stat("/dir/a.bin", StatFlags::empty(), &cancel()).unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.is_reg());
    }

    #[test]
    fn test_read_after_seek_past_end() {
        let host = MemHost::new();
        host.add_file("/a", "abc").unwrap();
        let mut file = host.create_file("/a", &cancel()).unwrap();
        file.open(OpenFlags::READ, &cancel()).unwrap();

        file.seek(10).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).unwrap(), 0);

        file.seek(1).unwrap();
        assert_eq!(file.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"bc");
    }

    #[test]
    fn test_no_exist_refuses_existing() {
        let host = MemHost::new();
        host.add_file("/a", "x").unwrap();
        let mut file = host.create_file("/a", &cancel()).unwrap();
        let err = file
            .open(OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::NO_EXIST, &cancel())
            .unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::AlreadyExists);
    }

    #[test]
    fn test_case_insensitive_lookup_keeps_display_name() {
        let host = MemHost::case_insensitive();
        host.add_dirs("/Photos").unwrap();

        let a = host.stat("/photos", StatFlags::empty(), &cancel()).unwrap();
        let b = host.stat("/PHOTOS", StatFlags::empty(), &cancel()).unwrap();
        assert!(a.same_object(&b));

        host.rename("/Photos", "/photos", &cancel()).unwrap();
        let names: Vec<_> = host
            .read_directory("/", &cancel())
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string())
            .collect();
        assert_eq!(names, vec!["photos"]);
    }

    #[test]
    fn test_rename_moves_descendants() {
        let host = MemHost::new();
        host.add_file("/a/b/c.txt", "c").unwrap();
        host.rename("/a", "/z", &cancel()).unwrap();
        assert_eq!(host.read_file("/z/b/c.txt").unwrap(), b"c");
        assert!(!host.exists("/a", &cancel()));
    }

    #[test]
    fn test_remove_non_empty_directory() {
        let host = MemHost::new();
        host.add_file("/a/f", "1").unwrap();
        let err = host.remove_directory("/a", &cancel()).unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::DirectoryNotEmpty);
    }

    #[test]
    fn test_unreadable_file() {
        let host = MemHost::new();
        host.add_file("/secret", "x").unwrap();
        host.set_mode("/secret", 0o000).unwrap();
        let mut file = host.create_file("/secret", &cancel()).unwrap();
        let err = file.open(OpenFlags::READ, &cancel()).unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);
    }

    #[test]
    fn test_capacity_limits_writes() {
        let host = MemHost::new();
        host.set_capacity(4);
        let mut file = host.create_file("/big", &cancel()).unwrap();
        file.open(OpenFlags::WRITE | OpenFlags::CREATE, &cancel()).unwrap();
        let err = file.write_all(b"too large").unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::NoSpace);
    }

    #[test]
    fn test_stat_follows_symlinks_unless_told() {
        let host = MemHost::new();
        host.add_file("/data/real", "abc").unwrap();
        host.add_symlink("/data/link", "real").unwrap();

        let followed = host.stat("/data/link", StatFlags::empty(), &cancel()).unwrap();
        assert!(followed.is_reg());
        let link = host.stat("/data/link", StatFlags::NO_FOLLOW, &cancel()).unwrap();
        assert!(link.is_symlink());
        assert_eq!(host.read_symlink("/data/link", &cancel()).unwrap(), "real");
    }
}
