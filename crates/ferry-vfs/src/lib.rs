//! Filesystem host backends for ferry.
//!
//! Every backend implements [`ferry_core::Host`]:
//!
//! - [`NativeHost`]: the local disk, the only host with `is_native() == true`
//! - [`MemHost`]: a writable in-memory tree, optionally case-insensitive
//! - [`ArchiveHost`]: a read-only view into a tar, compressed tar or zip file
//!   mounted on another host
//!
//! # Example
//!
//! ```rust,no_run
//! use ferry_core::{CancellationToken, HostExt};
//! use ferry_vfs::{NativeHost, resolve_location};
//!
//! let cancel = CancellationToken::new();
//! let native = NativeHost::shared();
//! let (host, inner) = resolve_location(&native, "/tmp/backup.tar.gz:/docs", &cancel).unwrap();
//! let listing = host.fetch_directory_listing(&inner, &cancel).unwrap();
//! for item in listing.items() {
//!     println!("{} ({} bytes)", item.filename(), item.size());
//! }
//! ```

mod archive;
mod mem;
mod native;

pub use archive::{ArchiveFile, ArchiveFormat, ArchiveHost, resolve_location, split_archive_location};
pub use mem::{MemFile, MemHost};
pub use native::{NativeFile, NativeHost};
