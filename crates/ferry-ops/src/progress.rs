//! Progress reporting types for copying jobs.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use ferry_core::ErrorCategory;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

/// The type of operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Copy,
    Move,
    Rename,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Rename => write!(f, "Rename"),
        }
    }
}

/// Phase of a job. Stages only move forward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
    FromRepr,
)]
#[repr(u8)]
pub enum Stage {
    #[default]
    Default,
    Preparing,
    Process,
    Verify,
    Cleaning,
}

/// Result of processing a single source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepResult {
    Ok,
    Skipped,
    Stop,
}

/// Progress information for an ongoing job.
#[derive(Debug, Clone)]
pub struct OperationProgress {
    /// The type of operation.
    pub operation_type: OperationType,
    pub stage: Stage,
    /// Number of items completed (processed or skipped).
    pub items_completed: usize,
    /// Total number of scanned items; grows if a directory is expanded late.
    pub items_total: usize,
    /// Number of bytes processed so far.
    pub bytes_processed: u64,
    /// Total bytes of regular files.
    pub bytes_total: u64,
    /// The item currently being processed.
    pub current_item: Option<String>,
    /// Whether the job is working on a single scanned item.
    pub single_item: bool,
    /// Whether the caller supplied a single top-level item.
    pub single_initial_item: bool,
}

impl OperationProgress {
    /// Get the progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_processed as f64 / self.bytes_total as f64) * 100.0
        } else if self.items_total > 0 {
            (self.items_completed as f64 / self.items_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Live counters shared between a running job and its observers.
#[derive(Debug)]
pub struct JobProgress {
    operation_type: OperationType,
    stage: AtomicU8,
    items_completed: AtomicUsize,
    items_total: AtomicUsize,
    bytes_processed: AtomicU64,
    bytes_total: AtomicU64,
    single_item: AtomicBool,
    single_initial_item: AtomicBool,
    current_item: Mutex<Option<String>>,
}

impl JobProgress {
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            stage: AtomicU8::new(Stage::Default as u8),
            items_completed: AtomicUsize::new(0),
            items_total: AtomicUsize::new(0),
            bytes_processed: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            single_item: AtomicBool::new(false),
            single_initial_item: AtomicBool::new(false),
            current_item: Mutex::new(None),
        }
    }

    pub fn stage(&self) -> Stage {
        Stage::from_repr(self.stage.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Advance to `stage`. Going backwards is ignored.
    pub(crate) fn set_stage(&self, stage: Stage) -> bool {
        self.stage.fetch_max(stage as u8, Ordering::AcqRel) < stage as u8
    }

    pub(crate) fn set_totals(&self, items: usize, bytes: u64) {
        self.items_total.store(items, Ordering::Release);
        self.bytes_total.store(bytes, Ordering::Release);
    }

    pub(crate) fn set_single_item(&self, scanned: bool, initial: bool) {
        self.single_item.store(scanned, Ordering::Release);
        self.single_initial_item.store(initial, Ordering::Release);
    }

    pub(crate) fn set_current_item(&self, path: Option<String>) {
        *self.current_item.lock() = path;
    }

    pub(crate) fn complete_item(&self) {
        self.items_completed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        self.bytes_processed.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Take back bytes of an attempt that will be repeated.
    pub(crate) fn remove_bytes(&self, bytes: u64) {
        let _ = self
            .bytes_processed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(bytes))
            });
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed.load(Ordering::Acquire)
    }

    /// Take a consistent-enough copy of the counters.
    pub fn snapshot(&self) -> OperationProgress {
        OperationProgress {
            operation_type: self.operation_type,
            stage: self.stage(),
            items_completed: self.items_completed.load(Ordering::Acquire),
            items_total: self.items_total.load(Ordering::Acquire),
            bytes_processed: self.bytes_processed.load(Ordering::Acquire),
            bytes_total: self.bytes_total.load(Ordering::Acquire),
            current_item: self.current_item.lock().clone(),
            single_item: self.single_item.load(Ordering::Acquire),
            single_initial_item: self.single_initial_item.load(Ordering::Acquire),
        }
    }
}

/// Callbacks fired by a running job on its worker thread.
pub trait JobObserver: Send {
    fn on_stage(&mut self, _stage: Stage, _progress: &JobProgress) {}

    fn on_item_started(&mut self, _index: usize, _path: &str, _progress: &JobProgress) {}

    fn on_item_finished(
        &mut self,
        _index: usize,
        _path: &str,
        _result: StepResult,
        _progress: &JobProgress,
    ) {
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed { reason: String },
}

/// An item the job did not transfer, with the failure that led to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub path: String,
    pub category: ErrorCategory,
    pub message: String,
}

/// Final account of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// The type of operation.
    pub operation_type: OperationType,
    pub outcome: JobOutcome,
    /// Number of items successfully processed.
    pub items_processed: usize,
    /// Number of items skipped, including descendants of skipped directories.
    pub items_skipped: usize,
    pub items_total: usize,
    pub bytes_processed: u64,
    pub bytes_total: u64,
    pub skipped: Vec<SkippedItem>,
    /// Destination paths whose contents did not match the source.
    pub checksum_mismatches: Vec<String>,
    pub duration: Duration,
}

impl JobReport {
    pub(crate) fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            outcome: JobOutcome::Completed,
            items_processed: 0,
            items_skipped: 0,
            items_total: 0,
            bytes_processed: 0,
            bytes_total: 0,
            skipped: Vec::new(),
            checksum_mismatches: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Check if the job finished and nothing was left behind.
    pub fn is_success(&self) -> bool {
        self.outcome == JobOutcome::Completed
            && self.items_skipped == 0
            && self.checksum_mismatches.is_empty()
    }

    /// Get a human-readable summary of the job.
    pub fn summary(&self) -> String {
        let action = match self.operation_type {
            OperationType::Copy => "Copied",
            OperationType::Move => "Moved",
            OperationType::Rename => "Renamed",
        };

        let mut text = format!("{} {} items", action, self.items_processed);
        if self.items_skipped > 0 {
            text.push_str(&format!(", {} skipped", self.items_skipped));
        }
        if !self.checksum_mismatches.is_empty() {
            text.push_str(&format!(
                ", {} failed verification",
                self.checksum_mismatches.len()
            ));
        }
        match &self.outcome {
            JobOutcome::Completed => {}
            JobOutcome::Cancelled => text.push_str(" (cancelled)"),
            JobOutcome::Failed { reason } => text.push_str(&format!(" (failed: {reason})")),
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_only_moves_forward() {
        let progress = JobProgress::new(OperationType::Copy);
        assert!(progress.set_stage(Stage::Process));
        assert!(!progress.set_stage(Stage::Preparing));
        assert_eq!(progress.stage(), Stage::Process);
    }

    #[test]
    fn test_snapshot_percentage() {
        let progress = JobProgress::new(OperationType::Move);
        progress.set_totals(4, 200);
        progress.add_bytes(50);
        progress.complete_item();
        progress.set_current_item(Some("/a".into()));

        let snap = progress.snapshot();
        assert_eq!(snap.items_completed, 1);
        assert_eq!(snap.current_item.as_deref(), Some("/a"));
        assert!((snap.percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary() {
        let mut report = JobReport::new(OperationType::Copy);
        report.items_processed = 3;
        report.items_skipped = 1;
        assert_eq!(report.summary(), "Copied 3 items, 1 skipped");
        assert!(!report.is_success());

        report.outcome = JobOutcome::Cancelled;
        assert!(report.summary().ends_with("(cancelled)"));
    }
}
