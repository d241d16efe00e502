//! Pre-order source scanner working through the VFS host interface.

use std::sync::Arc;

use ferry_core::{
    CancellationToken, ErrorCategory, ErrorResolver, HostExt, HostRef, IO_CHOICES, Listing,
    ListingItem, Prompt, Resolution, ScanError, VfsError, path,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::items::{ScanSkip, SourceItem, SourceItems};
use crate::progress::{ProgressTracker, ScanProgress};

/// Items between two progress broadcasts.
const PROGRESS_INTERVAL: u64 = 256;

/// Builds [`SourceItems`] from top-level listing items.
pub struct SourceItemsScanner {
    progress_tx: broadcast::Sender<ScanProgress>,
}

/// State of one walk.
struct Walk<'a> {
    resolver: &'a mut dyn ErrorResolver,
    cancel: &'a CancellationToken,
    tracker: ProgressTracker,
    progress_tx: &'a broadcast::Sender<ScanProgress>,
    skipped: Vec<ScanSkip>,
}

impl SourceItemsScanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        let (progress_tx, _) = broadcast::channel(100);
        Self { progress_tx }
    }

    /// Subscribe to scan progress updates.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }

    /// Scan `items` into a flattened, pre-ordered work list.
    ///
    /// Top-level directories are walked only when `expand` returns `true` for
    /// them. Symlinks are recorded, never followed. Listing failures are handed
    /// to `resolver` under [`ErrorCategory::Scan`]; skipped directories stay in
    /// the result and are listed by [`SourceItems::take_skipped`].
    pub fn scan(
        &self,
        items: &[ListingItem],
        mut expand: impl FnMut(&ListingItem) -> bool,
        resolver: &mut dyn ErrorResolver,
        cancel: &CancellationToken,
    ) -> Result<SourceItems, ScanError> {
        let mut db = SourceItems::new();
        let mut walk = Walk {
            resolver,
            cancel,
            tracker: ProgressTracker::new(),
            progress_tx: &self.progress_tx,
            skipped: Vec::new(),
        };

        for item in items {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let host = db.insert_host(item.host());
            let base_dir = db.insert_base_dir(item.directory());
            let record = SourceItem {
                name: item.filename().into(),
                parent: None,
                base_dir,
                host,
                size: item.size(),
                mode: item.unix_mode(),
                dev: item.stat().dev,
                ino: item.stat().ino,
                mtime: item.mtime(),
                symlink_target: item.symlink_target().map(str::to_string),
            };
            let is_dir = record.is_dir();
            walk.record(&record);
            let index = db.push(record);

            if is_dir && expand(item) {
                let mut subtree = Vec::new();
                walk.walk_directory(
                    item.host(),
                    &item.path(),
                    index,
                    index + 1,
                    host,
                    base_dir,
                    &mut subtree,
                )?;
                for child in subtree {
                    db.push(child);
                }
            }
        }

        walk.publish();
        for skip in walk.skipped {
            db.record_skip(skip);
        }
        debug!(
            items = db.len(),
            bytes = db.total_bytes(),
            "Source scan complete"
        );
        Ok(db)
    }

    /// Walk the directory at `index`, which was recorded without its contents,
    /// and splice its subtree right after it. Returns the number of added items.
    pub fn expand_directory(
        &self,
        db: &mut SourceItems,
        index: usize,
        resolver: &mut dyn ErrorResolver,
        cancel: &CancellationToken,
    ) -> Result<usize, ScanError> {
        let Some(item) = db.get(index) else {
            return Ok(0);
        };
        if !item.is_dir() {
            return Ok(0);
        }
        let (host_idx, base_dir) = (item.host, item.base_dir);
        let host = db.host(index).clone();
        let dir_path = db.source_path(index);

        let mut walk = Walk {
            resolver,
            cancel,
            tracker: ProgressTracker::new(),
            progress_tx: &self.progress_tx,
            skipped: Vec::new(),
        };
        let mut subtree = Vec::new();
        walk.walk_directory(
            &host,
            &dir_path,
            index,
            index + 1,
            host_idx,
            base_dir,
            &mut subtree,
        )?;
        walk.publish();
        for skip in walk.skipped {
            db.record_skip(skip);
        }

        let added = subtree.len();
        db.splice_after(index, subtree);
        debug!(path = %dir_path, added, "Expanded directory");
        Ok(added)
    }
}

impl Default for SourceItemsScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Walk<'_> {
    fn record(&mut self, item: &SourceItem) {
        if item.is_dir() {
            self.tracker.record_dir();
        } else if item.is_reg() {
            self.tracker.record_file(item.size);
        }
        if self.tracker.items() % PROGRESS_INTERVAL == 0 {
            self.publish();
        }
    }

    fn publish(&self) {
        let _ = self.progress_tx.send(self.tracker.snapshot());
    }

    /// List `dir_path`, asking the resolver until it succeeds or is skipped.
    fn list(&mut self, host: &HostRef, dir_path: &str) -> Result<Option<Arc<Listing>>, ScanError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            match host.fetch_directory_listing(dir_path, self.cancel) {
                Ok(listing) => return Ok(Some(listing)),
                Err(e) if e.kind() == ferry_core::VfsErrorKind::Cancelled => {
                    return Err(ScanError::Cancelled);
                }
                Err(e) => {
                    self.tracker.record_error();
                    match self.ask(dir_path, &e) {
                        Resolution::Retry => continue,
                        Resolution::Skip | Resolution::SkipAll => {
                            warn!(path = dir_path, error = %e, "Skipping unreadable directory contents");
                            self.skipped.push(ScanSkip {
                                path: dir_path.to_string(),
                                error: e,
                            });
                            return Ok(None);
                        }
                        _ => {
                            return Err(ScanError::Stopped {
                                path: dir_path.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    fn ask(&mut self, dir_path: &str, error: &VfsError) -> Resolution {
        let prompt = Prompt::new(ErrorCategory::Scan, dir_path, IO_CHOICES).with_error(error);
        let answer = self.resolver.resolve(&prompt);
        if prompt.allows(&answer) {
            answer
        } else {
            Resolution::Skip
        }
    }

    /// Append the pre-ordered contents of `dir_path` to `out`.
    ///
    /// `offset` is the absolute index the first element of `out` will occupy.
    #[allow(clippy::too_many_arguments)]
    fn walk_directory(
        &mut self,
        host: &HostRef,
        dir_path: &str,
        parent: usize,
        offset: usize,
        host_idx: usize,
        base_dir: usize,
        out: &mut Vec<SourceItem>,
    ) -> Result<(), ScanError> {
        self.tracker.set_current_path(dir_path);
        let Some(listing) = self.list(host, dir_path)? else {
            return Ok(());
        };

        for child in listing.items() {
            if self.cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let stat = *child.stat();
            let record = SourceItem {
                name: child.filename().into(),
                parent: Some(parent),
                base_dir,
                host: host_idx,
                size: stat.size,
                mode: stat.mode,
                dev: stat.dev,
                ino: stat.ino,
                mtime: stat.mtime,
                symlink_target: child.symlink_target().map(str::to_string),
            };
            let is_dir = record.is_dir();
            self.record(&record);
            out.push(record);
            let index = offset + out.len() - 1;

            if is_dir {
                let child_path = path::join(dir_path, child.filename());
                self.walk_directory(host, &child_path, index, offset, host_idx, base_dir, out)?;
            }
        }
        Ok(())
    }
}
