//! Transfer engine for ferry.
//!
//! This crate copies, moves and renames sets of items between VFS hosts. A
//! [`CopyingJob`] scans its sources, decides where every item lands, streams
//! bytes (double-buffered between native files), optionally verifies the result
//! and, for moves, removes the originals only after they were transferred.
//! Recoverable failures are handed to a [`ferry_core::ErrorResolver`].
//!
//! [`start_copying`] and [`start_rename`] run jobs on a blocking worker and
//! report through channels, following the same pattern for every operation.

mod conflict;
mod error;
mod executor;
mod job;
mod planner;
mod progress;
mod pump;
mod rename;
mod sticky;
mod transfer;
mod verify;

pub use conflict::{auto_rename_path, AVOID_CHOICES};
pub use error::JobError;
pub use executor::{spawn_job, start_copying, CopyingEvent, JobHandle, PromptRequest};
pub use job::CopyingJob;
pub use planner::{analyze_destination, DestinationPlan, PathComposition};
pub use progress::{
    JobObserver, JobOutcome, JobProgress, JobReport, OperationProgress, OperationType, SkippedItem,
    Stage, StepResult,
};
pub use rename::{rename_job, start_rename, validate_filename};

/// Default channel buffer size for job events.
pub const OPERATION_CHANNEL_SIZE: usize = 100;
