//! Source item scanner for ferry.
//!
//! This crate turns a set of top-level [`ferry_core::ListingItem`]s into a
//! flattened, pre-ordered work list ([`SourceItems`]) for the transfer engine.
//!
//! # Overview
//!
//! - **Pre-order**: every directory is recorded before its descendants
//! - **Stable order**: children are visited in byte-wise name order
//! - **Symlinks** are recorded with their target and never followed
//! - **Progress updates** via broadcast channels
//! - **Resolver driven**: unreadable directories are retried, skipped or abort
//!   the scan, as the [`ferry_core::ErrorResolver`] decides. Skipped directories
//!   are kept in the result as [`ScanSkip`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use ferry_core::{CancellationToken, FixedResolver, HostExt, Resolution};
//! use ferry_scan::SourceItemsScanner;
//! use ferry_vfs::NativeHost;
//!
//! let cancel = CancellationToken::new();
//! let host = NativeHost::shared();
//! let listing = host.fetch_single_item_listing("/path/to/dir", &cancel).unwrap();
//! let items: Vec<_> = listing.items().collect();
//!
//! let scanner = SourceItemsScanner::new();
//! let mut resolver = FixedResolver::new(Resolution::Skip);
//! let db = scanner.scan(&items, |_| true, &mut resolver, &cancel).unwrap();
//!
//! println!("{} items, {} bytes", db.len(), db.total_bytes());
//! ```

mod items;
mod progress;
mod scanner;

pub use items::{ScanSkip, SourceItem, SourceItems};
pub use progress::ScanProgress;
pub use scanner::SourceItemsScanner;

// Re-export core types for convenience
pub use ferry_core::ScanError;
