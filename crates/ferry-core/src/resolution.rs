//! The contract a job uses to ask how a recoverable failure should be resolved.
//!
//! The job knows nothing about how a prompt is presented. It hands a [`Prompt`] to
//! an [`ErrorResolver`] and acts on the returned [`Resolution`].

use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants};

use crate::error::VfsError;
use crate::stat::Stat;

/// Category of a recoverable (or fatal) failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Enumerating a source subtree failed.
    Scan,
    /// The destination root could not be prepared. Always fatal.
    DestinationSetup,
    /// An item already exists at the destination.
    Collision,
    /// A source item could not be opened or inspected.
    SourceAccess,
    /// Reading source data failed.
    ReadFailure,
    /// A destination file or directory could not be created.
    DestinationCreate,
    /// Writing destination data failed.
    WriteFailure,
    /// A symlink could not be read or recreated.
    Symlink,
    /// An in-place rename failed for a reason other than crossing volumes.
    Rename,
    /// Written data does not match the source checksum.
    ChecksumMismatch,
    /// A moved source item could not be removed.
    SourceDeletion,
    /// The destination volume lacks free space for the whole job.
    InsufficientSpace,
}

/// An answer to a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(Choice), derive(Hash, Serialize, Deserialize, Display))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
pub enum Resolution {
    /// Try the failed step again.
    Retry,
    /// Skip this item.
    Skip,
    /// Skip this item and every future failure of the same category.
    SkipAll,
    /// Replace the existing destination.
    Overwrite,
    /// Replace this and every later colliding destination.
    OverwriteAll,
    /// Continue writing after the existing destination bytes.
    Append,
    /// Append for this and every later collision.
    AppendAll,
    /// Write under the given name in the same directory.
    Rename(String),
    /// Write under an automatically chosen free name, e.g. `file (1).txt`.
    AutoRename,
    /// Stop the whole job.
    Abort,
}

impl Resolution {
    pub fn choice(&self) -> Choice {
        Choice::from(self)
    }

    /// Check if this answer applies to all remaining prompts of its category.
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::SkipAll | Self::OverwriteAll | Self::AppendAll)
    }
}

/// Choices offered for file collisions.
pub const FILE_COLLISION_CHOICES: &[Choice] = &[
    Choice::Overwrite,
    Choice::OverwriteAll,
    Choice::Append,
    Choice::AppendAll,
    Choice::Skip,
    Choice::SkipAll,
    Choice::Rename,
    Choice::AutoRename,
    Choice::Abort,
];

/// Choices offered for directory and symlink collisions.
pub const ITEM_COLLISION_CHOICES: &[Choice] = &[
    Choice::Overwrite,
    Choice::OverwriteAll,
    Choice::Skip,
    Choice::SkipAll,
    Choice::Rename,
    Choice::AutoRename,
    Choice::Abort,
];

/// Choices offered for recoverable I/O failures.
pub const IO_CHOICES: &[Choice] = &[Choice::Retry, Choice::Skip, Choice::SkipAll, Choice::Abort];

/// Choices offered when the whole job cannot continue as planned.
pub const PROCEED_CHOICES: &[Choice] = &[Choice::Retry, Choice::Skip, Choice::Abort];

/// Everything a resolver gets to see about a failure.
#[derive(Debug)]
pub struct Prompt<'a> {
    pub category: ErrorCategory,
    /// The offending path.
    pub path: &'a str,
    /// The colliding destination, for collisions.
    pub destination: Option<&'a str>,
    pub error: Option<&'a VfsError>,
    pub source_stat: Option<&'a Stat>,
    pub destination_stat: Option<&'a Stat>,
    /// Answers the job can act on.
    pub choices: &'a [Choice],
}

impl<'a> Prompt<'a> {
    pub fn new(category: ErrorCategory, path: &'a str, choices: &'a [Choice]) -> Self {
        Self {
            category,
            path,
            destination: None,
            error: None,
            source_stat: None,
            destination_stat: None,
            choices,
        }
    }

    pub fn with_error(mut self, error: &'a VfsError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_collision(
        mut self,
        destination: &'a str,
        source_stat: &'a Stat,
        destination_stat: &'a Stat,
    ) -> Self {
        self.destination = Some(destination);
        self.source_stat = Some(source_stat);
        self.destination_stat = Some(destination_stat);
        self
    }

    /// The OS error code behind the failure, if any.
    pub fn os_error(&self) -> Option<i32> {
        self.error.and_then(VfsError::raw_os_error)
    }

    pub fn allows(&self, resolution: &Resolution) -> bool {
        self.choices.contains(&resolution.choice())
    }
}

/// Decision-maker consulted by a job for every recoverable failure.
///
/// Implementations may be invoked from a worker thread.
pub trait ErrorResolver: Send {
    fn resolve(&mut self, prompt: &Prompt<'_>) -> Resolution;

    /// Notification of a failure that ends the job; no answer is expected.
    fn report_fatal(&mut self, _category: ErrorCategory, _path: &str, _error: &VfsError) {}
}

/// Resolver answering every prompt with the same resolution.
///
/// Answers that a prompt does not offer are replaced by `Skip`, or by `Abort`
/// when skipping is not offered either.
#[derive(Debug, Clone)]
pub struct FixedResolver {
    answer: Resolution,
}

impl FixedResolver {
    pub fn new(answer: Resolution) -> Self {
        Self { answer }
    }
}

impl ErrorResolver for FixedResolver {
    fn resolve(&mut self, prompt: &Prompt<'_>) -> Resolution {
        if prompt.allows(&self.answer) {
            self.answer.clone()
        } else if prompt.allows(&Resolution::Skip) {
            Resolution::Skip
        } else {
            Resolution::Abort
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_discriminant() {
        assert_eq!(Resolution::Rename("x".into()).choice(), Choice::Rename);
        assert_eq!(Choice::SkipAll.to_string(), "skip_all");
        assert!(Resolution::OverwriteAll.is_sticky());
        assert!(!Resolution::Overwrite.is_sticky());
    }

    #[test]
    fn test_fixed_resolver_falls_back() {
        let mut resolver = FixedResolver::new(Resolution::Append);
        let io_prompt = Prompt::new(ErrorCategory::ReadFailure, "/a", IO_CHOICES);
        assert_eq!(resolver.resolve(&io_prompt), Resolution::Skip);

        let collision = Prompt::new(ErrorCategory::Collision, "/a", FILE_COLLISION_CHOICES);
        assert_eq!(resolver.resolve(&collision), Resolution::Append);

        let setup = Prompt::new(ErrorCategory::InsufficientSpace, "/a", &[Choice::Abort]);
        assert_eq!(resolver.resolve(&setup), Resolution::Abort);
    }
}
