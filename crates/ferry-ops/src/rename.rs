//! Rename operation.

use ferry_core::{CancellationToken, CopyingOptions, ExistBehavior, HostExt, HostRef, path};
use tokio::sync::mpsc;

use crate::error::JobError;
use crate::executor::{spawn_job, CopyingEvent, JobHandle};
use crate::job::CopyingJob;
use crate::progress::OperationType;

/// Options of a rename: a move that never merges into an existing directory.
fn rename_options() -> CopyingOptions {
    CopyingOptions {
        exist_behavior: ExistBehavior::Ask,
        merge_directories: false,
        check_free_space: false,
        ..CopyingOptions::move_items()
    }
}

/// Build the job renaming the item at `source` to `new_name` in its directory.
pub fn rename_job(
    host: &HostRef,
    source: &str,
    new_name: &str,
    cancel: &CancellationToken,
) -> Result<CopyingJob, JobError> {
    validate_filename(new_name).map_err(JobError::InvalidName)?;

    let listing = host.fetch_single_item_listing(source, cancel)?;
    let destination = path::join(listing.directory(), new_name);
    let items = listing.items().collect();

    Ok(
        CopyingJob::new(items, destination, host.clone(), rename_options())
            .with_operation_type(OperationType::Rename)
            .with_cancel_token(cancel.clone()),
    )
}

/// Start an async rename of a single file or directory.
///
/// The new name is validated before anything touches the host. A name taken
/// by a file arrives as a collision prompt on the event receiver; an existing
/// directory of that name receives the item.
pub fn start_rename(
    host: &HostRef,
    source: &str,
    new_name: &str,
) -> Result<(JobHandle, mpsc::Receiver<CopyingEvent>), JobError> {
    let job = rename_job(host, source, new_name, &CancellationToken::new())?;
    Ok(spawn_job(job))
}

/// Validate a filename for cross-platform compatibility.
pub fn validate_filename(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Name cannot be empty".into());
    }

    if name.len() > 255 {
        return Err("Name is too long (max 255 characters)".into());
    }

    // Check for invalid characters
    let invalid_chars = ['/', '\0'];
    for c in invalid_chars {
        if name.contains(c) {
            return Err(format!("Name cannot contain '{}'", c));
        }
    }

    #[cfg(target_os = "windows")]
    {
        let windows_invalid = ['\\', ':', '*', '?', '"', '<', '>', '|'];
        for c in windows_invalid {
            if name.contains(c) {
                return Err(format!("Name cannot contain '{}'", c));
            }
        }
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err("Name cannot start or end with spaces".into());
    }

    if name == "." || name == ".." {
        return Err("'.' and '..' are reserved names".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename_valid() {
        assert!(validate_filename("test.txt").is_ok());
        assert!(validate_filename("my-file").is_ok());
        assert!(validate_filename(".hidden").is_ok());
        assert!(validate_filename("file with spaces").is_ok());
    }

    #[test]
    fn test_validate_filename_invalid() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("test/file").is_err());
        assert!(validate_filename(".").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("file ").is_err());
        assert!(validate_filename(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_rename_options_never_merge() {
        let options = rename_options();
        assert!(options.is_move());
        assert!(!options.merge_directories);
        assert_eq!(options.exist_behavior, CopyingOptions::default().exist_behavior);
    }
}
