//! Read-only host exposing the contents of an archive file.
//!
//! The archive is read once through its parent host when mounted, and every
//! entry is kept in memory. Directories that are only implied by entry paths are
//! synthesized so that each listed item has a parent.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ferry_core::path;
use ferry_core::{
    CancellationToken, DirEntry, FsStats, Host, HostExt, HostOptions, HostRef, ItemKind, OpenFlags,
    S_IFLNK, S_IFMT, Stat, StatFlags, VfsError, VfsErrorKind, VfsFile, VfsResult,
};
use tracing::{debug, warn};

static NEXT_VOLUME: AtomicU64 = AtomicU64::new(0x4152_4300_0000_0001);

const READ_CHUNK: usize = 256 * 1024;

/// Container formats understood by [`ArchiveHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Zip,
}

impl ArchiveFormat {
    /// Guess the format from a file name.
    pub fn from_path(p: &str) -> Option<Self> {
        let name = path::file_name(p).to_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::TarXz => "tar.xz",
            Self::Zip => "zip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct ArchiveEntry {
    name: String,
    kind: ItemKind,
    permissions: u32,
    mtime: Option<SystemTime>,
    data: Arc<[u8]>,
    link: Option<String>,
    ino: u64,
}

impl ArchiveEntry {
    fn directory(name: &str, ino: u64) -> Self {
        Self {
            name: name.to_string(),
            kind: ItemKind::Directory,
            permissions: 0o755,
            mtime: None,
            data: Arc::from(Vec::new()),
            link: None,
            ino,
        }
    }
}

/// Accumulates entries keyed by absolute path.
struct IndexBuilder {
    entries: BTreeMap<String, ArchiveEntry>,
    next_ino: u64,
}

impl IndexBuilder {
    fn new() -> Self {
        let mut builder = Self {
            entries: BTreeMap::new(),
            next_ino: 2,
        };
        builder
            .entries
            .insert("/".to_string(), ArchiveEntry::directory("/", 1));
        builder
    }

    fn ensure_parents(&mut self, p: &str) {
        let mut current = String::from("/");
        let components: Vec<&str> = path::components(p).collect();
        for component in components.iter().take(components.len().saturating_sub(1)) {
            current = path::join(&current, component);
            if !self.entries.contains_key(&current) {
                let ino = self.next_ino();
                self.entries
                    .insert(current.clone(), ArchiveEntry::directory(component, ino));
            }
        }
    }

    fn next_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn add(
        &mut self,
        raw_path: &str,
        kind: ItemKind,
        permissions: u32,
        mtime: Option<SystemTime>,
        data: Vec<u8>,
        link: Option<String>,
    ) {
        let normalized = path::join("/", raw_path.trim_start_matches("./"));
        let key = path::trim_trailing_slashes(&normalized).to_string();
        if key == "/" || key.split('/').any(|c| c == "..") {
            return;
        }
        self.ensure_parents(&key);
        let ino = self.next_ino();
        let entry = ArchiveEntry {
            name: path::file_name(&key).to_string(),
            kind,
            permissions: permissions & ferry_core::PERMISSION_MASK,
            mtime,
            data: Arc::from(data),
            link,
            ino,
        };
        self.entries.insert(key, entry);
    }

    fn read_tar(&mut self, reader: impl Read) -> io::Result<()> {
        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let raw_path = entry.path()?.to_string_lossy().into_owned();
            let header = entry.header();
            let permissions = header.mode().unwrap_or(0o644);
            let mtime = header
                .mtime()
                .ok()
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs));
            let entry_type = header.entry_type();

            if entry_type.is_dir() {
                self.add(&raw_path, ItemKind::Directory, permissions, mtime, Vec::new(), None);
            } else if entry_type.is_symlink() {
                let target = entry
                    .link_name()?
                    .map(|t| t.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.add(&raw_path, ItemKind::Symlink, 0o777, mtime, Vec::new(), Some(target));
            } else if entry_type.is_file() {
                let mut data = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut data)?;
                self.add(&raw_path, ItemKind::File, permissions, mtime, data, None);
            } else {
                debug!(path = %raw_path, "Skipping unsupported tar entry");
            }
        }
        Ok(())
    }

    fn read_zip(&mut self, bytes: Vec<u8>) -> io::Result<()> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(io::Error::other)?;
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(io::Error::other)?;
            let raw_path = file.name().to_string();
            let mode = file.unix_mode().unwrap_or(0);

            if file.is_dir() {
                self.add(&raw_path, ItemKind::Directory, mode | 0o755, None, Vec::new(), None);
            } else if mode & S_IFMT == S_IFLNK {
                let mut target = String::new();
                file.read_to_string(&mut target)?;
                self.add(&raw_path, ItemKind::Symlink, 0o777, None, Vec::new(), Some(target));
            } else {
                let mut data = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut data)?;
                let permissions = if mode == 0 { 0o644 } else { mode };
                self.add(&raw_path, ItemKind::File, permissions, None, data, None);
            }
        }
        Ok(())
    }
}

/// A read-only host mounted on an archive file of a parent host.
#[derive(Debug)]
pub struct ArchiveHost {
    parent: HostRef,
    junction: String,
    format: ArchiveFormat,
    volume_id: u64,
    entries: BTreeMap<String, ArchiveEntry>,
}

impl ArchiveHost {
    /// Open the archive at `archive_path` on `parent` and index its entries.
    pub fn mount(
        parent: HostRef,
        archive_path: &str,
        cancel: &CancellationToken,
    ) -> VfsResult<HostRef> {
        let format = ArchiveFormat::from_path(archive_path)
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotSupported, archive_path))?;
        let bytes = read_whole_file(&parent, archive_path, cancel)?;

        let mut builder = IndexBuilder::new();
        let parsed = match format {
            ArchiveFormat::Tar => builder.read_tar(Cursor::new(bytes)),
            ArchiveFormat::TarGz => builder.read_tar(flate2::read::GzDecoder::new(Cursor::new(bytes))),
            ArchiveFormat::TarBz2 => builder.read_tar(bzip2::read::BzDecoder::new(Cursor::new(bytes))),
            ArchiveFormat::TarXz => builder.read_tar(xz2::read::XzDecoder::new(Cursor::new(bytes))),
            ArchiveFormat::Zip => builder.read_zip(bytes),
        };
        if let Err(e) = parsed {
            warn!(path = archive_path, error = %e, "Failed to read archive");
            return Err(VfsError::io(archive_path, e));
        }

        debug!(
            path = archive_path,
            archive_format = %format,
            entries = builder.entries.len(),
            "Mounted archive"
        );
        Ok(Arc::new(Self {
            parent,
            junction: path::trim_trailing_slashes(archive_path).to_string(),
            format,
            volume_id: NEXT_VOLUME.fetch_add(1, Ordering::Relaxed),
            entries: builder.entries,
        }))
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn entry(&self, p: &str) -> VfsResult<&ArchiveEntry> {
        self.entries
            .get(path::trim_trailing_slashes(p))
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotFound, p))
    }

    fn stat_entry(&self, entry: &ArchiveEntry) -> Stat {
        let size = match entry.kind {
            ItemKind::Symlink => entry.link.as_ref().map_or(0, |l| l.len() as u64),
            _ => entry.data.len() as u64,
        };
        Stat {
            dev: self.volume_id,
            ino: entry.ino,
            mtime: entry.mtime,
            ..Stat::new(entry.kind, entry.permissions, size)
        }
    }
}

fn read_whole_file(host: &HostRef, p: &str, cancel: &CancellationToken) -> VfsResult<Vec<u8>> {
    let mut file = host.create_file(p, cancel)?;
    file.open(OpenFlags::READ, cancel)?;
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        if cancel.is_cancelled() {
            return Err(VfsError::cancelled(p));
        }
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&chunk[..n]);
    }
    file.close()?;
    Ok(bytes)
}

impl Host for ArchiveHost {
    fn tag(&self) -> &'static str {
        "arc"
    }

    fn junction_path(&self) -> &str {
        &self.junction
    }

    fn parent(&self) -> Option<&HostRef> {
        Some(&self.parent)
    }

    fn options(&self) -> Option<HostOptions> {
        Some(HostOptions::new().with("format", self.format.to_string()))
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn stat(&self, p: &str, flags: StatFlags, cancel: &CancellationToken) -> VfsResult<Stat> {
        if cancel.is_cancelled() {
            return Err(VfsError::cancelled(p));
        }
        let entry = self.entry(p)?;
        if !flags.contains(StatFlags::NO_FOLLOW) {
            if let Some(target) = &entry.link {
                let resolved = if path::is_absolute(target) {
                    target.clone()
                } else {
                    path::join(path::parent(p).unwrap_or("/"), target)
                };
                if let Ok(linked) = self.entry(&resolved) {
                    if linked.kind != ItemKind::Symlink {
                        return Ok(self.stat_entry(linked));
                    }
                }
            }
        }
        Ok(self.stat_entry(entry))
    }

    fn read_directory(&self, p: &str, cancel: &CancellationToken) -> VfsResult<Vec<DirEntry>> {
        let dir = self.entry(p)?;
        if dir.kind != ItemKind::Directory {
            return Err(VfsError::new(VfsErrorKind::NotADirectory, p));
        }
        let prefix = path::ensure_trailing_slash(path::trim_trailing_slashes(p));
        let mut listed = Vec::new();
        for (key, entry) in self.entries.range(prefix.clone()..) {
            if cancel.is_cancelled() {
                return Err(VfsError::cancelled(p));
            }
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            if rest.is_empty() || rest.contains('/') {
                continue;
            }
            let mut dir_entry = DirEntry::new(entry.name.as_str(), self.stat_entry(entry));
            if let Some(link) = &entry.link {
                dir_entry = dir_entry.with_symlink_target(link.clone());
            }
            listed.push(dir_entry);
        }
        Ok(listed)
    }

    fn create_file(&self, p: &str, _cancel: &CancellationToken) -> VfsResult<Box<dyn VfsFile>> {
        Ok(Box::new(ArchiveFile {
            path: p.to_string(),
            data: self.entry(p).ok().map(|e| (e.kind, Arc::clone(&e.data))),
            position: 0,
            opened: false,
        }))
    }

    fn statfs(&self, _p: &str, cancel: &CancellationToken) -> VfsResult<FsStats> {
        let total = self.entries.values().map(|e| e.data.len() as u64).sum();
        let case_sensitive = self
            .parent
            .statfs(&self.junction, cancel)
            .map(|s| s.case_sensitive)
            .unwrap_or(true);
        Ok(FsStats {
            volume_id: self.volume_id,
            total_bytes: total,
            free_bytes: 0,
            avail_bytes: 0,
            volume_name: path::file_name(&self.junction).to_string(),
            case_sensitive,
        })
    }

    fn read_symlink(&self, p: &str, _cancel: &CancellationToken) -> VfsResult<String> {
        self.entry(p)?
            .link
            .clone()
            .ok_or_else(|| VfsError::new(VfsErrorKind::InvalidPath, p))
    }
}

/// Read-only handle to one archive entry.
#[derive(Debug)]
pub struct ArchiveFile {
    path: String,
    data: Option<(ItemKind, Arc<[u8]>)>,
    position: usize,
    opened: bool,
}

impl VfsFile for ArchiveFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self, flags: OpenFlags, _cancel: &CancellationToken) -> VfsResult<()> {
        if flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREATE) {
            return Err(VfsError::new(VfsErrorKind::ReadOnly, &self.path));
        }
        match &self.data {
            None => Err(VfsError::new(VfsErrorKind::NotFound, &self.path)),
            Some((ItemKind::Directory, _)) => {
                Err(VfsError::new(VfsErrorKind::IsADirectory, &self.path))
            }
            Some(_) => {
                self.opened = true;
                self.position = 0;
                Ok(())
            }
        }
    }

    fn is_opened(&self) -> bool {
        self.opened
    }

    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let data = match (&self.data, self.opened) {
            (Some((_, data)), true) => data,
            _ => return Err(VfsError::new(VfsErrorKind::NotOpened, &self.path)),
        };
        let remaining = data.len().saturating_sub(self.position);
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> VfsResult<usize> {
        Err(VfsError::new(VfsErrorKind::ReadOnly, &self.path))
    }

    fn seek(&mut self, offset: u64) -> VfsResult<u64> {
        if !self.opened {
            return Err(VfsError::new(VfsErrorKind::NotOpened, &self.path));
        }
        self.position = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(offset)
    }

    fn size(&self) -> VfsResult<u64> {
        match &self.data {
            Some((_, data)) if self.opened => Ok(data.len() as u64),
            _ => Err(VfsError::new(VfsErrorKind::NotOpened, &self.path)),
        }
    }

    fn close(&mut self) -> VfsResult<()> {
        self.opened = false;
        Ok(())
    }
}

/// Split `outer.tar:/inner/path` into the archive path and the inner path.
///
/// Returns `None` when `location` does not name an archive junction.
pub fn split_archive_location(location: &str) -> Option<(&str, &str)> {
    let (outer, inner) = location.split_once(':')?;
    ArchiveFormat::from_path(outer)?;
    let inner = if inner.is_empty() { "/" } else { inner };
    Some((outer, inner))
}

/// Resolve `outer.zip:/inner` locations to a mounted archive host, or return the
/// parent host unchanged for plain paths.
pub fn resolve_location(
    parent: &HostRef,
    location: &str,
    cancel: &CancellationToken,
) -> VfsResult<(HostRef, String)> {
    match split_archive_location(location) {
        Some((outer, inner)) => {
            let host = ArchiveHost::mount(parent.clone(), outer, cancel)?;
            debug!(location = %host.path_stack(inner).verbose_string(), "Resolved archive location");
            Ok((host, inner.to_string()))
        }
        None => Ok((parent.clone(), location.to_string())),
    }
}
