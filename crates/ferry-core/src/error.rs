//! Error types shared by every VFS backend.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by host and file operations.
pub type VfsResult<T> = Result<T, VfsError>;

/// Classification of a VFS failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VfsErrorKind {
    /// The path does not exist.
    NotFound,
    /// Access was denied by the backend.
    PermissionDenied,
    /// An entry already exists at the path.
    AlreadyExists,
    /// A rename crossed a volume boundary.
    CrossDevice,
    /// A path component is not a directory.
    NotADirectory,
    /// The operation expected a non-directory.
    IsADirectory,
    /// The directory still has entries.
    DirectoryNotEmpty,
    /// No space left on the volume.
    NoSpace,
    /// The backend is read-only.
    ReadOnly,
    /// The backend does not implement this capability.
    NotSupported,
    /// The path is malformed (e.g. not absolute).
    InvalidPath,
    /// The file handle is not opened in a suitable mode.
    NotOpened,
    /// The operation was cancelled.
    Cancelled,
    /// Any other I/O failure.
    Io,
}

impl fmt::Display for VfsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "No such file or directory"),
            Self::PermissionDenied => write!(f, "Permission denied"),
            Self::AlreadyExists => write!(f, "File exists"),
            Self::CrossDevice => write!(f, "Cross-device link"),
            Self::NotADirectory => write!(f, "Not a directory"),
            Self::IsADirectory => write!(f, "Is a directory"),
            Self::DirectoryNotEmpty => write!(f, "Directory not empty"),
            Self::NoSpace => write!(f, "No space left on device"),
            Self::ReadOnly => write!(f, "Read-only file system"),
            Self::NotSupported => write!(f, "Operation not supported"),
            Self::InvalidPath => write!(f, "Invalid path"),
            Self::NotOpened => write!(f, "File is not opened"),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Io => write!(f, "I/O error"),
        }
    }
}

impl VfsErrorKind {
    /// Map a std I/O error kind onto the VFS taxonomy.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::CrossesDevices => Self::CrossDevice,
            io::ErrorKind::NotADirectory => Self::NotADirectory,
            io::ErrorKind::IsADirectory => Self::IsADirectory,
            io::ErrorKind::DirectoryNotEmpty => Self::DirectoryNotEmpty,
            io::ErrorKind::StorageFull => Self::NoSpace,
            io::ErrorKind::ReadOnlyFilesystem => Self::ReadOnly,
            io::ErrorKind::Unsupported => Self::NotSupported,
            io::ErrorKind::Interrupted => Self::Cancelled,
            _ => Self::Io,
        }
    }
}

/// An error produced by a host or a file handle.
#[derive(Debug, Error)]
#[error("{kind}: {path}")]
pub struct VfsError {
    kind: VfsErrorKind,
    path: String,
    #[source]
    source: Option<io::Error>,
}

impl VfsError {
    /// Create an error without an underlying OS error.
    pub fn new(kind: VfsErrorKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            source: None,
        }
    }

    /// Wrap an OS-level I/O error with path context.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self {
            kind: VfsErrorKind::from_io(&source),
            path: path.into(),
            source: Some(source),
        }
    }

    /// Shorthand for a cancellation error.
    pub fn cancelled(path: impl Into<String>) -> Self {
        Self::new(VfsErrorKind::Cancelled, path)
    }

    pub fn kind(&self) -> VfsErrorKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw OS error code, when the failure came from the operating system.
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(io::Error::raw_os_error)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == VfsErrorKind::NotFound
    }

    pub fn is_cross_device(&self) -> bool {
        self.kind == VfsErrorKind::CrossDevice
    }
}

/// Errors that abort a source scan as a whole.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The resolver asked to stop the scan.
    #[error("Scan stopped at {path}")]
    Stopped { path: String },

    /// The scan was cancelled.
    #[error("Scan cancelled")]
    Cancelled,

    /// A host failure that could not be handed to a resolver.
    #[error(transparent)]
    Vfs(#[from] VfsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vfs_error_io_kind() {
        let err = VfsError::io(
            "/test/path",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);
        assert_eq!(err.path(), "/test/path");
        assert!(err.to_string().contains("Permission denied"));
    }

    #[test]
    fn test_raw_os_error_passthrough() {
        let err = VfsError::io("/x", io::Error::from_raw_os_error(2));
        assert_eq!(err.raw_os_error(), Some(2));
        assert!(err.is_not_found());

        let plain = VfsError::new(VfsErrorKind::ReadOnly, "/x");
        assert_eq!(plain.raw_os_error(), None);
    }
}
