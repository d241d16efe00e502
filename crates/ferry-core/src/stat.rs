//! Item metadata as reported by hosts.

use std::time::SystemTime;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// File type mask of a unix mode.
pub const S_IFMT: u32 = 0o170000;
/// Directory file type.
pub const S_IFDIR: u32 = 0o040000;
/// Regular file type.
pub const S_IFREG: u32 = 0o100000;
/// Symbolic link file type.
pub const S_IFLNK: u32 = 0o120000;
/// Permission bits of a unix mode.
pub const PERMISSION_MASK: u32 = 0o7777;

/// Type of a filesystem item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link (never followed by the engine).
    Symlink,
    /// Sockets, devices, fifos.
    Other,
}

impl ItemKind {
    /// Derive the kind from the file-type bits of a unix mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::File,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            _ => Self::Other,
        }
    }

    /// The file-type bits for this kind.
    pub fn type_bits(self) -> u32 {
        match self {
            Self::File => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
            Self::Other => 0,
        }
    }
}

/// Result of a `stat` call on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Size in bytes (0 for directories on most hosts).
    pub size: u64,
    /// Unix mode: file-type bits plus permission bits.
    pub mode: u32,
    /// Device / volume identifier.
    pub dev: u64,
    /// Inode number, unique within `dev`.
    pub ino: u64,
    /// Last modification time, when known.
    pub mtime: Option<SystemTime>,
}

impl Stat {
    /// Build a stat record from kind and permission bits.
    pub fn new(kind: ItemKind, permissions: u32, size: u64) -> Self {
        Self {
            size,
            mode: kind.type_bits() | (permissions & PERMISSION_MASK),
            dev: 0,
            ino: 0,
            mtime: None,
        }
    }

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

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & PERMISSION_MASK
    }

    /// Check if both records describe the same object on the same volume.
    pub fn same_object(&self, other: &Stat) -> bool {
        self.dev == other.dev && self.ino == other.ino && self.ino != 0
    }
}

bitflags! {
    /// Flags for `Host::stat`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatFlags: u32 {
        /// Report the link itself instead of its target.
        const NO_FOLLOW = 1 << 0;
    }
}

bitflags! {
    /// Flags for `VfsFile::open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Create the file if it does not exist.
        const CREATE = 1 << 2;
        /// Fail if the file already exists.
        const NO_EXIST = 1 << 3;
        /// Truncate an existing file to zero length.
        const TRUNCATE = 1 << 4;
        /// Position writes at the end of existing content.
        const APPEND = 1 << 5;
    }
}

/// Volume-level statistics returned by `Host::statfs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    /// Identifier of the volume; equal ids mean an in-place rename is possible.
    pub volume_id: u64,
    pub total_bytes: u64,
    pub free_bytes: u64,
    /// Bytes available to the current user.
    pub avail_bytes: u64,
    pub volume_name: String,
    pub case_sensitive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_mode() {
        assert_eq!(ItemKind::from_mode(S_IFREG | 0o644), ItemKind::File);
        assert_eq!(ItemKind::from_mode(S_IFDIR | 0o755), ItemKind::Directory);
        assert_eq!(ItemKind::from_mode(S_IFLNK | 0o777), ItemKind::Symlink);
        assert_eq!(ItemKind::from_mode(0o010000), ItemKind::Other);
    }

    #[test]
    fn test_same_object_requires_inode() {
        let a = Stat::new(ItemKind::File, 0o644, 1);
        let b = Stat::new(ItemKind::File, 0o644, 1);
        assert!(!a.same_object(&b));

        let c = Stat { ino: 7, dev: 1, ..a };
        let d = Stat { ino: 7, dev: 1, ..b };
        assert!(c.same_object(&d));
    }
}
