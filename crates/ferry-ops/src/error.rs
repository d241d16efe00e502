//! Fatal job errors.

use ferry_core::{ScanError, VfsError};
use thiserror::Error;

/// A failure that ends a job as a whole.
///
/// Per-item failures never surface here; they are handed to the
/// [`ferry_core::ErrorResolver`] and end up in the job report.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// The destination root could not be created or inspected.
    #[error("Cannot prepare destination {path}: {source}")]
    DestinationSetup {
        path: String,
        #[source]
        source: VfsError,
    },

    /// Several items were given but the destination is an existing non-directory.
    #[error("Destination {path} exists and is not a directory")]
    DestinationNotDirectory { path: String },

    /// The destination lies inside a source directory.
    #[error("Cannot copy {source_path} into itself ({destination})")]
    DestinationInsideSource {
        source_path: String,
        destination: String,
    },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    /// The resolver asked to stop the job.
    #[error("Stopped")]
    Stopped,

    #[error("Cancelled")]
    Cancelled,

    /// The worker running the job went away.
    #[error("Job task failed: {0}")]
    Join(String),
}

impl JobError {
    /// Check if the job ended because it was asked to.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Cancelled | Self::Scan(ScanError::Cancelled)
        ) || matches!(self, Self::Scan(ScanError::Stopped { .. }))
    }
}
