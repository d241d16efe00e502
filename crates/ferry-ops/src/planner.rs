//! Destination classification.
//!
//! Before the first byte is written the job decides how a source item's relative
//! path turns into a destination path, and whether the destination directory has
//! to be built first.

use ferry_core::{
    CancellationToken, HostExt, HostRef, Stat, StatFlags, VfsError, VfsErrorKind, path,
};
use ferry_scan::SourceItems;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::JobError;

/// How destination paths are composed from relative source paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathComposition {
    /// Destination directory plus the full relative source path.
    PathPrefix,
    /// The destination replaces the top-level item's name.
    FixedPath,
}

/// Outcome of destination analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPlan {
    pub composition: PathComposition,
    /// Normalized destination: trailing slash for `PathPrefix`, none for `FixedPath`.
    pub destination: String,
    /// Missing components must be created before processing.
    pub needs_build: bool,
    /// A single item is renamed onto itself with different letter case.
    pub case_renaming: bool,
}

impl DestinationPlan {
    fn prefix(destination: &str, needs_build: bool) -> Self {
        Self {
            composition: PathComposition::PathPrefix,
            destination: path::ensure_trailing_slash(destination),
            needs_build,
            case_renaming: false,
        }
    }

    fn fixed(destination: &str, needs_build: bool) -> Self {
        Self {
            composition: PathComposition::FixedPath,
            destination: path::trim_trailing_slashes(destination).to_string(),
            needs_build,
            case_renaming: false,
        }
    }

    /// Destination path for an item with relative path `relative` (e.g. `"dir/sub/b.txt"`).
    pub fn compose(&self, relative: &str) -> String {
        match self.composition {
            PathComposition::PathPrefix => path::join(&self.destination, relative),
            PathComposition::FixedPath => match relative.find(path::SEPARATOR) {
                Some(idx) => format!("{}{}", self.destination, &relative[idx..]),
                None => self.destination.clone(),
            },
        }
    }

    /// Directory that must exist before the first item is written.
    pub fn directory_to_build(&self) -> &str {
        match self.composition {
            PathComposition::PathPrefix => &self.destination,
            PathComposition::FixedPath => path::parent(&self.destination).unwrap_or("/"),
        }
    }
}

/// Classify `destination` for `items`, of which `initial_count` were given by the caller.
pub fn analyze_destination(
    items: &SourceItems,
    initial_count: usize,
    destination: &str,
    host: &HostRef,
    cancel: &CancellationToken,
) -> Result<DestinationPlan, JobError> {
    if !path::is_absolute(destination) {
        return Err(JobError::DestinationSetup {
            path: destination.to_string(),
            source: VfsError::new(VfsErrorKind::InvalidPath, destination),
        });
    }

    let plan = match host.stat(destination, StatFlags::empty(), cancel) {
        Ok(st) => {
            if initial_count == 1 && is_case_renaming(items, destination, host, &st) {
                let mut plan = DestinationPlan::fixed(destination, false);
                plan.case_renaming = true;
                plan
            } else if st.is_dir() {
                DestinationPlan::prefix(destination, false)
            } else if initial_count <= 1 {
                DestinationPlan::fixed(destination, false)
            } else {
                return Err(JobError::DestinationNotDirectory {
                    path: destination.to_string(),
                });
            }
        }
        Err(e) if e.is_not_found() => {
            if path::has_trailing_slash(destination) || initial_count > 1 {
                DestinationPlan::prefix(destination, true)
            } else {
                DestinationPlan::fixed(destination, true)
            }
        }
        Err(source) => {
            return Err(JobError::DestinationSetup {
                path: destination.to_string(),
                source,
            });
        }
    };

    debug!(
        destination = %plan.destination,
        composition = ?plan.composition,
        needs_build = plan.needs_build,
        case_renaming = plan.case_renaming,
        "Destination analyzed"
    );
    Ok(plan)
}

/// Check if the only top-level item and `destination` are one object whose names differ in case.
fn is_case_renaming(
    items: &SourceItems,
    destination: &str,
    host: &HostRef,
    dest_stat: &Stat,
) -> bool {
    let Some(first) = items.get(0) else {
        return false;
    };
    if !items.host(0).is_same_host(host) {
        return false;
    }
    let source = items.source_path(0);
    let source = path::trim_trailing_slashes(&source);
    let destination = path::trim_trailing_slashes(destination);
    source != destination
        && path::eq_ignore_case(source, destination)
        && first.stat().same_object(dest_stat)
}

/// Reject plans that would put a directory inside itself.
pub fn check_not_inside_source(
    items: &SourceItems,
    plan: &DestinationPlan,
    host: &HostRef,
) -> Result<(), JobError> {
    if plan.case_renaming {
        return Ok(());
    }
    for (index, item) in items.iter().enumerate() {
        if !item.is_top_level() || !item.is_dir() || !items.host(index).is_same_host(host) {
            continue;
        }
        let source = items.source_path(index);
        let target = plan.compose(&items.compose_relative_path(index));
        if path::is_within(&target, &source) {
            return Err(JobError::DestinationInsideSource {
                source_path: source,
                destination: target,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(composition: PathComposition, destination: &str) -> DestinationPlan {
        DestinationPlan {
            composition,
            destination: destination.to_string(),
            needs_build: false,
            case_renaming: false,
        }
    }

    #[test]
    fn test_compose_path_prefix() {
        let p = plan(PathComposition::PathPrefix, "/out/");
        assert_eq!(p.compose("dir/sub/b.txt"), "/out/dir/sub/b.txt");
        assert_eq!(p.compose("a.txt"), "/out/a.txt");
        assert_eq!(p.directory_to_build(), "/out/");
    }

    #[test]
    fn test_compose_fixed_path() {
        let p = plan(PathComposition::FixedPath, "/out/renamed");
        assert_eq!(p.compose("dir"), "/out/renamed");
        assert_eq!(p.compose("dir/sub/b.txt"), "/out/renamed/sub/b.txt");
        assert_eq!(p.directory_to_build(), "/out/");
    }
}
