//! Host backed by the local operating system filesystem.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};

use ferry_core::{
    CancellationToken, DirEntry, FsStats, Host, HostRef, OpenFlags, Stat, StatFlags,
    VfsError, VfsErrorKind, VfsFile, VfsResult,
};
use tracing::{debug, trace};

/// The local disk. Paths of this host are OS paths.
#[derive(Debug, Default)]
pub struct NativeHost;

impl NativeHost {
    pub fn new() -> Self {
        Self
    }

    /// Shared handle, the form every job consumes.
    pub fn shared() -> HostRef {
        Arc::new(Self)
    }
}

/// Convert OS metadata into a VFS stat record.
pub(crate) fn stat_from_metadata(meta: &Metadata) -> Stat {
    #[cfg(unix)]
    {
        Stat {
            size: meta.len(),
            mode: meta.mode(),
            dev: meta.dev(),
            ino: meta.ino(),
            mtime: meta.modified().ok(),
        }
    }
    #[cfg(not(unix))]
    {
        use ferry_core::ItemKind;

        let kind = if meta.file_type().is_symlink() {
            ItemKind::Symlink
        } else if meta.is_dir() {
            ItemKind::Directory
        } else {
            ItemKind::File
        };
        let perms = if meta.permissions().readonly() { 0o444 } else { 0o644 };
        Stat {
            mtime: meta.modified().ok(),
            ..Stat::new(kind, perms, meta.len())
        }
    }
}

fn check_cancel(path: &str, cancel: &CancellationToken) -> VfsResult<()> {
    if cancel.is_cancelled() {
        Err(VfsError::cancelled(path))
    } else {
        Ok(())
    }
}

/// Map an error, normalizing the several errnos used for non-empty directories.
fn map_rmdir_error(path: &str, err: std::io::Error) -> VfsError {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        if matches!(
            err.raw_os_error().map(Errno::from_raw),
            Some(Errno::ENOTEMPTY | Errno::EEXIST)
        ) {
            return VfsError::new(VfsErrorKind::DirectoryNotEmpty, path);
        }
    }
    VfsError::io(path, err)
}

#[cfg(unix)]
fn space_of(path: &str) -> std::io::Result<(u64, u64, u64)> {
    let st = nix::sys::statvfs::statvfs(path)?;
    let unit = st.fragment_size() as u64;
    Ok((
        st.blocks() as u64 * unit,
        st.blocks_free() as u64 * unit,
        st.blocks_available() as u64 * unit,
    ))
}

#[cfg(not(unix))]
fn space_of(_path: &str) -> std::io::Result<(u64, u64, u64)> {
    Ok((0, u64::MAX, u64::MAX))
}

/// Closest existing ancestor of `path` (or `path` itself).
fn existing_ancestor(path: &str) -> Option<&str> {
    let mut current = Some(path);
    while let Some(p) = current {
        if Path::new(p).exists() {
            return Some(p);
        }
        current = ferry_core::path::parent(ferry_core::path::trim_trailing_slashes(p))
            .map(ferry_core::path::trim_trailing_slashes);
    }
    None
}

impl Host for NativeHost {
    fn tag(&self) -> &'static str {
        "native"
    }

    fn is_native(&self) -> bool {
        true
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn stat(&self, path: &str, flags: StatFlags, cancel: &CancellationToken) -> VfsResult<Stat> {
        check_cancel(path, cancel)?;
        let meta = if flags.contains(StatFlags::NO_FOLLOW) {
            fs::symlink_metadata(path)
        } else {
            fs::metadata(path)
        };
        meta.map(|m| stat_from_metadata(&m))
            .map_err(|e| VfsError::io(path, e))
    }

    fn read_directory(&self, path: &str, cancel: &CancellationToken) -> VfsResult<Vec<DirEntry>> {
        let reader = fs::read_dir(path).map_err(|e| VfsError::io(path, e))?;
        let mut entries = Vec::new();
        for entry in reader {
            check_cancel(path, cancel)?;
            let entry = entry.map_err(|e| VfsError::io(path, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let full = entry.path();
            let meta = fs::symlink_metadata(&full)
                .map_err(|e| VfsError::io(full.to_string_lossy(), e))?;
            let stat = stat_from_metadata(&meta);
            let mut dir_entry = DirEntry::new(name, stat);
            if stat.is_symlink() {
                dir_entry.symlink_target = fs::read_link(&full)
                    .ok()
                    .map(|t| t.to_string_lossy().into_owned());
            }
            entries.push(dir_entry);
        }
        trace!(path, count = entries.len(), "Read native directory");
        Ok(entries)
    }

    fn create_file(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<Box<dyn VfsFile>> {
        Ok(Box::new(NativeFile::new(path)))
    }

    fn statfs(&self, path: &str, cancel: &CancellationToken) -> VfsResult<FsStats> {
        check_cancel(path, cancel)?;
        let anchor = existing_ancestor(path).unwrap_or("/");
        let meta = fs::metadata(anchor).map_err(|e| VfsError::io(anchor, e))?;
        let (total, free, avail) = space_of(anchor).map_err(|e| VfsError::io(anchor, e))?;

        #[cfg(unix)]
        let volume_id = meta.dev();
        #[cfg(not(unix))]
        let volume_id = {
            let _ = meta;
            0
        };

        Ok(FsStats {
            volume_id,
            total_bytes: total,
            free_bytes: free,
            avail_bytes: avail,
            volume_name: anchor.to_string(),
            case_sensitive: !cfg!(any(target_os = "macos", target_os = "windows")),
        })
    }

    fn create_directory(&self, path: &str, mode: u32, _cancel: &CancellationToken) -> VfsResult<()> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path).map_err(|e| VfsError::io(path, e))
    }

    fn read_symlink(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<String> {
        fs::read_link(path)
            .map(|t| t.to_string_lossy().into_owned())
            .map_err(|e| VfsError::io(path, e))
    }

    #[cfg(unix)]
    fn create_symlink(&self, path: &str, target: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        std::os::unix::fs::symlink(target, path).map_err(|e| VfsError::io(path, e))
    }

    fn unlink(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        fs::remove_file(path).map_err(|e| VfsError::io(path, e))
    }

    fn remove_directory(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        fs::remove_dir(path).map_err(|e| map_rmdir_error(path, e))
    }

    fn rename(&self, old_path: &str, new_path: &str, _cancel: &CancellationToken) -> VfsResult<()> {
        debug!(from = old_path, to = new_path, "Native rename");
        fs::rename(old_path, new_path).map_err(|e| VfsError::io(old_path, e))
    }

    #[cfg(unix)]
    fn set_permissions(&self, path: &str, mode: u32, _cancel: &CancellationToken) -> VfsResult<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & ferry_core::PERMISSION_MASK))
            .map_err(|e| VfsError::io(path, e))
    }

    fn set_modification_time(
        &self,
        path: &str,
        mtime: SystemTime,
        _cancel: &CancellationToken,
    ) -> VfsResult<()> {
        filetime::set_symlink_file_times(
            path,
            filetime::FileTime::now(),
            filetime::FileTime::from_system_time(mtime),
        )
        .map_err(|e| VfsError::io(path, e))
    }
}

/// File handle of the native host.
#[derive(Debug)]
pub struct NativeFile {
    path: String,
    file: Option<File>,
}

impl NativeFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    fn handle(&mut self) -> VfsResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotOpened, &self.path))
    }

    /// The underlying OS file, when opened.
    pub fn as_std(&self) -> Option<&File> {
        self.file.as_ref()
    }
}

impl VfsFile for NativeFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn open(&mut self, flags: OpenFlags, cancel: &CancellationToken) -> VfsResult<()> {
        check_cancel(&self.path, cancel)?;
        let mut options = OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND))
            .append(flags.contains(OpenFlags::APPEND))
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        if flags.contains(OpenFlags::NO_EXIST) {
            options.create_new(true);
        } else if flags.contains(OpenFlags::CREATE) {
            options.create(true);
        }
        #[cfg(unix)]
        options.mode(0o644);

        let file = options.open(&self.path).map_err(|e| VfsError::io(&self.path, e))?;
        let meta = file.metadata().map_err(|e| VfsError::io(&self.path, e))?;
        if meta.is_dir() {
            return Err(VfsError::new(VfsErrorKind::IsADirectory, &self.path));
        }
        self.file = Some(file);
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let path = self.path.clone();
        self.handle()?.read(buf).map_err(|e| VfsError::io(path, e))
    }

    fn write(&mut self, buf: &[u8]) -> VfsResult<usize> {
        let path = self.path.clone();
        self.handle()?.write(buf).map_err(|e| VfsError::io(path, e))
    }

    fn seek(&mut self, offset: u64) -> VfsResult<u64> {
        let path = self.path.clone();
        self.handle()?
            .seek(SeekFrom::Start(offset))
            .map_err(|e| VfsError::io(path, e))
    }

    fn size(&self) -> VfsResult<u64> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| VfsError::new(VfsErrorKind::NotOpened, &self.path))?;
        file.metadata()
            .map(|m| m.len())
            .map_err(|e| VfsError::io(&self.path, e))
    }

    #[cfg(unix)]
    fn xattrs(&mut self) -> VfsResult<Vec<(String, Vec<u8>)>> {
        use xattr::FileExt;

        let path = self.path.clone();
        let file = self.handle()?;
        let names = match file.list_xattr() {
            Ok(names) => names,
            Err(e) if e.kind() == std::io::ErrorKind::Unsupported => return Ok(Vec::new()),
            Err(e) => return Err(VfsError::io(path, e)),
        };
        let mut attrs = Vec::new();
        for name in names {
            let Some(value) = file.get_xattr(&name).ok().flatten() else {
                continue;
            };
            attrs.push((name.to_string_lossy().into_owned(), value));
        }
        Ok(attrs)
    }

    #[cfg(unix)]
    fn set_xattr(&mut self, name: &str, value: &[u8]) -> VfsResult<()> {
        use xattr::FileExt;

        let path = self.path.clone();
        self.handle()?
            .set_xattr(name, value)
            .map_err(|e| VfsError::io(path, e))
    }

    fn close(&mut self) -> VfsResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| VfsError::io(&self.path, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::ItemKind;

    #[test]
    fn test_existing_ancestor_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().into_owned();
        let missing = format!("{root}/a/b/c/");
        assert_eq!(existing_ancestor(&missing), Some(root.as_str()));
    }

    #[test]
    fn test_unopened_file_reports_not_opened() {
        let mut file = NativeFile::new("/nonexistent");
        let mut buf = [0u8; 4];
        let err = file.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), VfsErrorKind::NotOpened);
        assert!(!file.is_opened());
    }

    #[cfg(unix)]
    #[test]
    fn test_statfs_reports_space() {
        let dir = tempfile::tempdir().unwrap();
        let host = NativeHost::new();
        let root = dir.path().to_string_lossy().into_owned();
        let stats = host
            .statfs(&format!("{root}/missing/file"), &CancellationToken::new())
            .unwrap();
        assert!(stats.total_bytes > 0);
        assert!(stats.avail_bytes <= stats.total_bytes);
        assert_eq!(stats.volume_id, fs::metadata(dir.path()).unwrap().dev());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_empty_directory_errno_is_mapped() {
        let err = std::io::Error::from_raw_os_error(nix::errno::Errno::ENOTEMPTY as i32);
        let mapped = map_rmdir_error("/dir", err);
        assert_eq!(mapped.kind(), VfsErrorKind::DirectoryNotEmpty);
    }

    #[test]
    fn test_stat_kind_of_directory() {
        let dir = tempfile::tempdir().unwrap();
        let host = NativeHost::new();
        let cancel = CancellationToken::new();
        let stat = host
            .stat(&dir.path().to_string_lossy(), StatFlags::empty(), &cancel)
            .unwrap();
        assert_eq!(stat.kind(), ItemKind::Directory);
    }
}
