//! Name collision helpers.

use std::time::{SystemTime, UNIX_EPOCH};

use ferry_core::{CancellationToken, Choice, Host, path};

/// Choices offered when the destination can only be avoided, not replaced.
pub const AVOID_CHOICES: &[Choice] = &[
    Choice::Skip,
    Choice::SkipAll,
    Choice::Rename,
    Choice::AutoRename,
    Choice::Abort,
];

/// What to do with an item whose destination is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Collision {
    /// Replace the existing destination.
    Overwrite,
    /// Write after the existing destination bytes.
    Append,
    /// Write to this free path instead.
    Divert(String),
    Skip,
    Stop,
}

/// Split `name` into stem and extension, keeping dotfiles whole.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}

fn numbered_name(name: &str, n: u64) -> String {
    match split_extension(name) {
        (stem, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
        (stem, None) => format!("{} ({})", stem, n),
    }
}

/// Generate a free sibling path to avoid a collision.
///
/// For "file.txt", tries "file (1).txt", "file (2).txt", etc.
pub fn auto_rename_path(host: &dyn Host, target: &str, cancel: &CancellationToken) -> String {
    let target = path::trim_trailing_slashes(target);
    let dir = path::parent(target).unwrap_or("/");
    let name = path::file_name(target);

    for i in 1..1000 {
        let candidate = path::join(dir, &numbered_name(name, i));
        if !host.exists(&candidate, cancel) {
            return candidate;
        }
    }

    // Fallback: use timestamp
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let new_name = match split_extension(name) {
        (stem, Some(ext)) => format!("{}_{}.{}", stem, timestamp, ext),
        (stem, None) => format!("{}_{}", stem, timestamp),
    };
    path::join(dir, &new_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{
        DirEntry, FsStats, ItemKind, Stat, StatFlags, VfsError, VfsErrorKind, VfsFile, VfsResult,
    };

    /// Host where only the listed paths exist.
    #[derive(Debug)]
    struct Taken(Vec<&'static str>);

    impl Host for Taken {
        fn tag(&self) -> &'static str {
            "taken"
        }

        fn is_writable(&self) -> bool {
            false
        }

        fn stat(&self, p: &str, _: StatFlags, _: &CancellationToken) -> VfsResult<Stat> {
            if self.0.contains(&p) {
                Ok(Stat::new(ItemKind::File, 0o644, 0))
            } else {
                Err(VfsError::new(VfsErrorKind::NotFound, p))
            }
        }

        fn read_directory(&self, p: &str, _: &CancellationToken) -> VfsResult<Vec<DirEntry>> {
            Err(self.unsupported(p))
        }

        fn create_file(&self, p: &str, _: &CancellationToken) -> VfsResult<Box<dyn VfsFile>> {
            Err(self.unsupported(p))
        }

        fn statfs(&self, p: &str, _: &CancellationToken) -> VfsResult<FsStats> {
            Err(self.unsupported(p))
        }
    }

    #[test]
    fn test_auto_rename_path() {
        let host = Taken(vec!["/tmp/test.txt", "/tmp/test (1).txt"]);
        let renamed = auto_rename_path(&host, "/tmp/test.txt", &CancellationToken::new());
        assert_eq!(renamed, "/tmp/test (2).txt");
    }

    #[test]
    fn test_auto_rename_no_extension() {
        let host = Taken(vec![]);
        let cancel = CancellationToken::new();
        assert_eq!(auto_rename_path(&host, "/tmp/testfile", &cancel), "/tmp/testfile (1)");
        assert_eq!(auto_rename_path(&host, "/tmp/.profile", &cancel), "/tmp/.profile (1)");
        assert_eq!(auto_rename_path(&host, "/tmp/dir/", &cancel), "/tmp/dir (1)");
    }
}
