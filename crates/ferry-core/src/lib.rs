//! Core VFS types and traits for ferry.
//!
//! This crate provides the virtual filesystem abstraction shared by every
//! backend and by the transfer engine: the [`Host`] capability interface,
//! file handles, immutable listings, path stacks, copying options and the
//! vocabulary of the error-resolution boundary.

mod config;
mod error;
mod host;
mod listing;
pub mod path;
mod path_stack;
mod resolution;
mod stat;

pub use config::{
    ChecksumVerification, CopyingOptions, CopyingOptionsBuilder, ExistBehavior, TransferMode,
    DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
pub use error::{ScanError, VfsError, VfsErrorKind, VfsResult};
pub use host::{DirEntry, Host, HostExt, HostOptions, HostRef, VfsFile};
pub use listing::{Listing, ListingItem};
pub use path_stack::{PathStack, PathStackPart};
pub use resolution::{
    Choice, ErrorCategory, ErrorResolver, FixedResolver, Prompt, Resolution,
    FILE_COLLISION_CHOICES, IO_CHOICES, ITEM_COLLISION_CHOICES, PROCEED_CHOICES,
};
pub use stat::{
    FsStats, ItemKind, OpenFlags, Stat, StatFlags, PERMISSION_MASK, S_IFDIR, S_IFLNK, S_IFMT,
    S_IFREG,
};

/// Cancellation token accepted by every host call.
pub use tokio_util::sync::CancellationToken;
