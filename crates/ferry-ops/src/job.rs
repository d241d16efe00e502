//! The copying job.
//!
//! A job runs through its stages strictly in order:
//!
//! 1. `Preparing`: scan the sources, classify the destination, build it if needed
//!    and check free space.
//! 2. `Process`: transfer every scanned item (see `transfer.rs`).
//! 3. `Verify`: compare written files with source checksums, when enabled.
//! 4. `Cleaning`: remove transferred sources of a move.
//!
//! Every recoverable failure goes through the caller's [`ErrorResolver`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use ferry_core::{
    CancellationToken, CopyingOptions, ErrorCategory, ErrorResolver, ExistBehavior, HostExt,
    HostRef, IO_CHOICES, ItemKind, ListingItem, PROCEED_CHOICES, Prompt, Resolution, ScanError,
    VfsError, VfsErrorKind, VfsResult, path,
};
use ferry_scan::{SourceItem, SourceItems, SourceItemsScanner};
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::planner::{self, DestinationPlan};
use crate::progress::{
    JobObserver, JobOutcome, JobProgress, JobReport, OperationType, SkippedItem, Stage, StepResult,
};
use crate::pump::BufferPool;
use crate::sticky::StickyResolver;
use crate::verify::ChecksumExpectation;

/// Mode used for directories while their contents are written.
pub(crate) const WORKING_DIRECTORY_MODE: u32 = 0o700;

/// A copy or move of a set of items to one destination.
///
/// # Example
///
/// ```no_run
/// use ferry_core::{CancellationToken, CopyingOptions, FixedResolver, HostExt, Resolution};
/// use ferry_ops::CopyingJob;
/// use ferry_vfs::NativeHost;
///
/// let host = NativeHost::shared();
/// let cancel = CancellationToken::new();
/// let listing = host.fetch_single_item_listing("/tmp/report.txt", &cancel).unwrap();
/// let items = listing.items().collect();
///
/// let job = CopyingJob::new(items, "/tmp/backup/", host, CopyingOptions::copy());
/// let report = job.run(&mut FixedResolver::new(Resolution::Skip));
/// println!("{}", report.summary());
/// ```
pub struct CopyingJob {
    items: Vec<ListingItem>,
    destination: String,
    destination_host: HostRef,
    options: CopyingOptions,
    operation_type: OperationType,
    progress: Arc<JobProgress>,
    cancel: CancellationToken,
    scanner: SourceItemsScanner,
    observer: Option<Box<dyn JobObserver>>,
}

impl CopyingJob {
    pub fn new(
        items: Vec<ListingItem>,
        destination: impl Into<String>,
        destination_host: HostRef,
        options: CopyingOptions,
    ) -> Self {
        let operation_type = if options.is_move() {
            OperationType::Move
        } else {
            OperationType::Copy
        };
        Self {
            items,
            destination: destination.into(),
            destination_host,
            options,
            operation_type,
            progress: Arc::new(JobProgress::new(operation_type)),
            cancel: CancellationToken::new(),
            scanner: SourceItemsScanner::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl JobObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Use an existing token, e.g. one shared with other jobs.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn with_operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = operation_type;
        self.progress = Arc::new(JobProgress::new(operation_type));
        self
    }

    pub fn progress(&self) -> Arc<JobProgress> {
        Arc::clone(&self.progress)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The scanner used in the `Preparing` stage; subscribe to follow the scan.
    pub fn scanner(&self) -> &SourceItemsScanner {
        &self.scanner
    }

    /// Run the job to completion on the current thread.
    pub fn run(self, resolver: &mut dyn ErrorResolver) -> JobReport {
        let started = Instant::now();
        let Self {
            items: initial,
            destination,
            destination_host,
            options,
            operation_type,
            progress,
            cancel,
            scanner,
            observer,
        } = self;

        info!(
            operation = %operation_type,
            items = initial.len(),
            destination = %destination,
            "Starting job"
        );

        let mut notifier = Notifier { progress, observer };
        let mut resolver = StickyResolver::new(resolver);

        let prepared = prepare(
            &initial,
            &destination,
            &destination_host,
            &options,
            &scanner,
            &mut notifier,
            &mut resolver,
            &cancel,
        );

        let (result, mut report) = match prepared {
            Ok(prepared) => {
                let mut runner = Runner::new(
                    prepared,
                    destination_host,
                    options,
                    scanner,
                    notifier,
                    resolver,
                    cancel,
                    JobReport::new(operation_type),
                );
                let result = runner.execute();
                (result, runner.finish())
            }
            Err(e) => (Err(e), JobReport::new(operation_type)),
        };

        report.outcome = match result {
            Ok(()) => JobOutcome::Completed,
            Err(e) if e.is_interruption() => JobOutcome::Cancelled,
            Err(e) => JobOutcome::Failed {
                reason: e.to_string(),
            },
        };
        report.duration = started.elapsed();
        info!(summary = %report.summary(), elapsed = ?report.duration, "Job finished");
        report
    }
}

/// Stage and item notifications.
pub(crate) struct Notifier {
    pub progress: Arc<JobProgress>,
    observer: Option<Box<dyn JobObserver>>,
}

impl Notifier {
    pub fn stage(&mut self, stage: Stage) {
        if self.progress.set_stage(stage) {
            debug!(%stage, "Entering stage");
            if let Some(observer) = self.observer.as_mut() {
                observer.on_stage(stage, &self.progress);
            }
        }
    }

    fn item_started(&mut self, index: usize, path: &str) {
        self.progress.set_current_item(Some(path.to_string()));
        if let Some(observer) = self.observer.as_mut() {
            observer.on_item_started(index, path, &self.progress);
        }
    }

    fn item_finished(&mut self, index: usize, path: &str, result: StepResult) {
        self.progress.complete_item();
        if let Some(observer) = self.observer.as_mut() {
            observer.on_item_finished(index, path, result, &self.progress);
        }
    }
}

/// Output of the `Preparing` stage.
pub(crate) struct Prepared {
    items: SourceItems,
    plan: DestinationPlan,
    destination_volume: Option<u64>,
}

#[allow(clippy::too_many_arguments)]
fn prepare(
    initial: &[ListingItem],
    destination: &str,
    destination_host: &HostRef,
    options: &CopyingOptions,
    scanner: &SourceItemsScanner,
    notifier: &mut Notifier,
    resolver: &mut StickyResolver<'_>,
    cancel: &CancellationToken,
) -> Result<Prepared, JobError> {
    notifier.stage(Stage::Preparing);

    let destination_volume = destination_volume(destination_host, destination, cancel);
    let is_move = options.is_move();

    // Directories that will be renamed as a whole are not walked.
    let items = scanner.scan(
        initial,
        |item| {
            !(is_move
                && item.host().is_same_host(destination_host)
                && Some(item.stat().dev) == destination_volume)
        },
        resolver,
        cancel,
    )?;
    notifier.progress.set_totals(items.len(), items.total_bytes());
    notifier
        .progress
        .set_single_item(items.len() == 1, initial.len() == 1);

    let plan = planner::analyze_destination(
        &items,
        initial.len(),
        destination,
        destination_host,
        cancel,
    )
    .and_then(|plan| {
        planner::check_not_inside_source(&items, &plan, destination_host)?;
        Ok(plan)
    })
    .inspect_err(|e| report_fatal(resolver, destination, e))?;

    if plan.needs_build {
        let dir = plan.directory_to_build();
        if let Err(source) = destination_host.create_directory_all(dir, 0o755, cancel) {
            if source.kind() == VfsErrorKind::Cancelled {
                return Err(JobError::Cancelled);
            }
            resolver.report_fatal(ErrorCategory::DestinationSetup, dir, &source);
            return Err(JobError::DestinationSetup {
                path: dir.to_string(),
                source,
            });
        }
        debug!(path = dir, "Built destination directory");
    }

    Ok(Prepared {
        items,
        plan,
        destination_volume,
    })
}

/// Volume of `destination`, or of its closest existing ancestor.
fn destination_volume(host: &HostRef, destination: &str, cancel: &CancellationToken) -> Option<u64> {
    let mut probe = path::trim_trailing_slashes(destination);
    loop {
        match host.statfs(probe, cancel) {
            Ok(fs) => return Some(fs.volume_id),
            Err(e) if e.is_not_found() => probe = path::trim_trailing_slashes(path::parent(probe)?),
            Err(_) => return None,
        }
    }
}

fn report_fatal(resolver: &mut StickyResolver<'_>, destination: &str, error: &JobError) {
    match error {
        JobError::DestinationSetup { path, source } => {
            resolver.report_fatal(ErrorCategory::DestinationSetup, path, source);
        }
        JobError::DestinationNotDirectory { path } => {
            let source = VfsError::new(VfsErrorKind::NotADirectory, path.as_str());
            resolver.report_fatal(ErrorCategory::DestinationSetup, path, &source);
        }
        JobError::DestinationInsideSource { destination: target, .. } => {
            let source = VfsError::new(VfsErrorKind::InvalidPath, target.as_str());
            resolver.report_fatal(ErrorCategory::DestinationSetup, target, &source);
        }
        _ => {
            debug!(destination, error = %error, "Preparation failed");
        }
    }
}

/// What the resolver decided after a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorAction {
    Retry,
    Skip,
    Stop,
}

/// Attributes applied to created directories once their contents are in place.
struct DeferredDirectory {
    path: String,
    mode: u32,
    mtime: Option<SystemTime>,
}

/// Mutable state of a job past the `Preparing` stage.
pub(crate) struct Runner<'a> {
    pub items: SourceItems,
    pub plan: DestinationPlan,
    pub dest_host: HostRef,
    pub options: CopyingOptions,
    pub cancel: CancellationToken,
    pub resolver: StickyResolver<'a>,
    pub notifier: Notifier,
    pub pool: BufferPool,
    pub report: JobReport,
    scanner: SourceItemsScanner,
    destination_volume: Option<u64>,
    /// Sticky collision policy, seeded from the options.
    collision_policy: ExistBehavior,
    /// Actual destination of every processed directory.
    dir_destinations: HashMap<usize, String>,
    /// Skipped directories whose contents are skipped along with them,
    /// with the category of the original skip.
    skipped_dirs: HashMap<usize, ErrorCategory>,
    /// Top-level directories walked late because they could not be renamed whole.
    expanded: HashSet<usize>,
    /// Transferred sources to remove in the `Cleaning` stage.
    pub to_delete: Vec<usize>,
    pub expectations: Vec<ChecksumExpectation>,
    /// Source indices that failed verification.
    pub mismatched: HashSet<usize>,
    deferred_dirs: Vec<DeferredDirectory>,
}

impl<'a> Runner<'a> {
    #[allow(clippy::too_many_arguments)]
    fn new(
        prepared: Prepared,
        dest_host: HostRef,
        options: CopyingOptions,
        scanner: SourceItemsScanner,
        notifier: Notifier,
        resolver: StickyResolver<'a>,
        cancel: CancellationToken,
        report: JobReport,
    ) -> Self {
        Self {
            items: prepared.items,
            plan: prepared.plan,
            dest_host,
            collision_policy: options.exist_behavior,
            pool: BufferPool::new(options.effective_buffer_size()),
            options,
            cancel,
            resolver,
            notifier,
            report,
            scanner,
            destination_volume: prepared.destination_volume,
            dir_destinations: HashMap::new(),
            skipped_dirs: HashMap::new(),
            expanded: HashSet::new(),
            to_delete: Vec::new(),
            expectations: Vec::new(),
            mismatched: HashSet::new(),
            deferred_dirs: Vec::new(),
        }
    }

    fn execute(&mut self) -> Result<(), JobError> {
        self.record_scan_skips();
        self.check_free_space()?;
        self.process_all()?;
        self.verify_all()?;
        self.clean_sources()
    }

    fn finish(self) -> JobReport {
        let mut report = self.report;
        report.items_total = self.items.len();
        report.bytes_total = self.items.total_bytes();
        report.bytes_processed = self.notifier.progress.bytes_processed();
        debug!(prompts = self.resolver.prompts(), "Resolver consulted");
        report
    }

    pub fn collision_policy(&self) -> ExistBehavior {
        self.collision_policy
    }

    pub fn set_collision_policy(&mut self, policy: ExistBehavior) {
        self.collision_policy = policy;
    }

    /// Check if the item at `index` can be moved with a single rename.
    fn can_rename_in_place(&self, index: usize, item: &SourceItem) -> bool {
        self.options.is_move()
            && self.items.host(index).is_same_host(&self.dest_host)
            && self.destination_volume == Some(item.dev)
            && (!item.is_dir() || (item.is_top_level() && !self.expanded.contains(&index)))
    }

    /// Destination of the item at `index`, following renamed parent directories.
    pub fn destination_for(&self, index: usize) -> String {
        if let Some(item) = self.items.get(index) {
            if let Some(dir) = item.parent.and_then(|p| self.dir_destinations.get(&p)) {
                return path::join(dir, &item.name);
            }
        }
        self.plan.compose(&self.items.compose_relative_path(index))
    }

    pub fn record_directory_destination(&mut self, index: usize, destination: &str) {
        self.dir_destinations.insert(index, destination.to_string());
    }

    pub fn defer_directory_attributes(&mut self, path: &str, item: &SourceItem) {
        self.deferred_dirs.push(DeferredDirectory {
            path: path.to_string(),
            mode: item.stat().permissions(),
            mtime: item.mtime,
        });
    }

    /// Record a skipped item and return [`StepResult::Skipped`].
    pub fn skipped(
        &mut self,
        path: &str,
        category: ErrorCategory,
        message: impl ToString,
    ) -> StepResult {
        let message = message.to_string();
        warn!(path, category = %category, message = %message, "Skipping item");
        self.report.skipped.push(SkippedItem {
            path: path.to_string(),
            category,
            message,
        });
        StepResult::Skipped
    }

    /// Report directories whose contents the scanner skipped.
    fn record_scan_skips(&mut self) {
        for skip in self.items.take_skipped() {
            self.report.items_skipped += 1;
            self.skipped(&skip.path, ErrorCategory::Scan, &skip.error);
        }
    }

    /// Ask the resolver what to do about a failed step.
    pub fn on_error(&mut self, category: ErrorCategory, path: &str, error: &VfsError) -> ErrorAction {
        if error.kind() == VfsErrorKind::Cancelled || self.cancel.is_cancelled() {
            return ErrorAction::Stop;
        }
        let prompt = Prompt::new(category, path, IO_CHOICES).with_error(error);
        match self.resolver.resolve(&prompt) {
            Resolution::Retry => ErrorAction::Retry,
            Resolution::Skip | Resolution::SkipAll => ErrorAction::Skip,
            _ => ErrorAction::Stop,
        }
    }

    /// Run `op` until it succeeds, is skipped or the job is stopped.
    pub fn attempt<T>(
        &mut self,
        category: ErrorCategory,
        path: &str,
        mut op: impl FnMut() -> VfsResult<T>,
    ) -> Result<T, StepResult> {
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => match self.on_error(category, path, &e) {
                    ErrorAction::Retry => continue,
                    ErrorAction::Skip => return Err(self.skipped(path, category, &e)),
                    ErrorAction::Stop => return Err(StepResult::Stop),
                },
            }
        }
    }

    /// Walk a directory that was recorded without its contents.
    pub fn expand(&mut self, index: usize, path: &str) -> Result<(), StepResult> {
        match self.scanner.expand_directory(
            &mut self.items,
            index,
            &mut self.resolver,
            &self.cancel,
        ) {
            Ok(added) => {
                self.expanded.insert(index);
                self.record_scan_skips();
                self.notifier
                    .progress
                    .set_totals(self.items.len(), self.items.total_bytes());
                debug!(path, added, "Directory will be copied item by item");
                Ok(())
            }
            Err(ScanError::Vfs(e)) => Err(self.skipped(path, ErrorCategory::Scan, e)),
            Err(_) => Err(StepResult::Stop),
        }
    }

    fn check_free_space(&mut self) -> Result<(), JobError> {
        if !self.options.check_free_space {
            return Ok(());
        }
        let needed: u64 = self
            .items
            .iter()
            .enumerate()
            .filter(|(index, item)| item.is_reg() && !self.can_rename_in_place(*index, item))
            .map(|(_, item)| item.size)
            .sum();
        if needed == 0 {
            return Ok(());
        }

        let dir = self.plan.directory_to_build().to_string();
        loop {
            let stats = match self.dest_host.statfs(&dir, &self.cancel) {
                Ok(stats) => stats,
                Err(e) => {
                    debug!(path = %dir, error = %e, "Free space unknown");
                    return Ok(());
                }
            };
            if stats.avail_bytes >= needed {
                return Ok(());
            }

            let error = VfsError::new(VfsErrorKind::NoSpace, dir.as_str());
            let prompt =
                Prompt::new(ErrorCategory::InsufficientSpace, &dir, PROCEED_CHOICES).with_error(&error);
            match self.resolver.resolve(&prompt) {
                Resolution::Retry => continue,
                Resolution::Skip | Resolution::SkipAll => {
                    warn!(needed, available = stats.avail_bytes, "Proceeding without enough free space");
                    return Ok(());
                }
                _ => return Err(JobError::Stopped),
            }
        }
    }

    fn process_all(&mut self) -> Result<(), JobError> {
        self.notifier.stage(Stage::Process);

        // The list can grow while iterating when a directory is expanded late.
        let mut index = 0;
        while index < self.items.len() {
            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let source = self.items.source_path(index);
            self.notifier.item_started(index, &source);
            let result = self.process_item(index, &source);
            self.notifier.item_finished(index, &source, result);

            match result {
                StepResult::Ok => self.report.items_processed += 1,
                StepResult::Skipped => {
                    self.report.items_skipped += 1;
                    if self.items.get(index).is_some_and(SourceItem::is_dir) {
                        if let Some(last) = self.report.skipped.last() {
                            self.skipped_dirs.insert(index, last.category);
                        }
                    }
                }
                StepResult::Stop => {
                    return Err(if self.cancel.is_cancelled() {
                        JobError::Cancelled
                    } else {
                        JobError::Stopped
                    });
                }
            }
            index += 1;
        }

        self.notifier.progress.set_current_item(None);
        self.apply_directory_attributes();
        Ok(())
    }

    fn process_item(&mut self, index: usize, source: &str) -> StepResult {
        let Some(item) = self.items.get(index).cloned() else {
            return StepResult::Skipped;
        };
        if let Some(category) = item.parent.and_then(|p| self.skipped_dirs.get(&p).copied()) {
            return self.skipped(source, category, "Parent directory skipped");
        }

        let destination = self.destination_for(index);
        debug!(source, destination = %destination, kind = ?item.kind(), "Processing item");

        if self.can_rename_in_place(index, &item) {
            return self.rename_in_place(index, &item, source, &destination);
        }

        match item.kind() {
            ItemKind::Directory => self.copy_directory(index, &item, source, &destination),
            ItemKind::File => self.copy_file(index, &item, source, &destination, None),
            ItemKind::Symlink => self.copy_symlink(index, &item, source, &destination),
            ItemKind::Other => {
                let error = VfsError::new(VfsErrorKind::NotSupported, source);
                match self.on_error(ErrorCategory::SourceAccess, source, &error) {
                    ErrorAction::Stop => StepResult::Stop,
                    _ => self.skipped(source, ErrorCategory::SourceAccess, &error),
                }
            }
        }
    }

    /// Set final permissions and times of created directories, deepest first.
    fn apply_directory_attributes(&mut self) {
        for dir in self.deferred_dirs.drain(..).rev() {
            if self.options.copy_unix_permissions {
                if let Err(e) = self.dest_host.set_permissions(&dir.path, dir.mode, &self.cancel) {
                    debug!(path = %dir.path, error = %e, "Cannot set directory permissions");
                }
            }
            if self.options.copy_file_times {
                if let Some(mtime) = dir.mtime {
                    if let Err(e) = self.dest_host.set_modification_time(&dir.path, mtime, &self.cancel)
                    {
                        debug!(path = %dir.path, error = %e, "Cannot set directory time");
                    }
                }
            }
        }
    }

    fn clean_sources(&mut self) -> Result<(), JobError> {
        if !self.options.is_move() || self.to_delete.is_empty() {
            return Ok(());
        }
        self.notifier.stage(Stage::Cleaning);

        let queue: Vec<usize> = std::mem::take(&mut self.to_delete)
            .into_iter()
            .filter(|index| !self.mismatched.contains(index))
            .collect();
        let (dirs, others): (Vec<usize>, Vec<usize>) = queue
            .into_iter()
            .partition(|&index| self.items.get(index).is_some_and(SourceItem::is_dir));

        for index in others {
            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let host = self.items.host(index).clone();
            let path = self.items.source_path(index);
            let cancel = self.cancel.clone();
            match self.attempt(ErrorCategory::SourceDeletion, &path, || host.unlink(&path, &cancel)) {
                Ok(()) => debug!(path = %path, "Removed source"),
                Err(StepResult::Stop) => return Err(JobError::Stopped),
                Err(_) => {}
            }
        }

        // Pre-order reversed puts children before their parents.
        for index in dirs.into_iter().rev() {
            if self.cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let host = self.items.host(index).clone();
            let path = self.items.source_path(index);
            loop {
                match host.remove_directory(&path, &self.cancel) {
                    Ok(()) => {
                        debug!(path = %path, "Removed source directory");
                        break;
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            VfsErrorKind::DirectoryNotEmpty | VfsErrorKind::NotFound
                        ) =>
                    {
                        debug!(path = %path, error = %e, "Keeping source directory");
                        break;
                    }
                    Err(e) => match self.on_error(ErrorCategory::SourceDeletion, &path, &e) {
                        ErrorAction::Retry => continue,
                        ErrorAction::Skip => {
                            self.skipped(&path, ErrorCategory::SourceDeletion, &e);
                            break;
                        }
                        ErrorAction::Stop => return Err(JobError::Stopped),
                    },
                }
            }
        }
        Ok(())
    }
}
