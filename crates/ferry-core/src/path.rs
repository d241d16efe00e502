//! Helpers for the `/`-separated paths used inside every host.
//!
//! VFS paths are plain strings rather than `PathBuf`s: archive and memory hosts
//! have no OS path representation, and every host agrees on `/` as separator.

/// Path separator used by all hosts.
pub const SEPARATOR: char = '/';

/// Check if a VFS path is absolute.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEPARATOR)
}

/// Check if a path carries an explicit directory intent.
pub fn has_trailing_slash(path: &str) -> bool {
    path.ends_with(SEPARATOR)
}

/// Append a trailing slash unless one is already present.
pub fn ensure_trailing_slash(path: &str) -> String {
    if has_trailing_slash(path) {
        path.to_string()
    } else {
        format!("{path}{SEPARATOR}")
    }
}

/// Strip trailing slashes, leaving the root `/` intact.
pub fn trim_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    if trimmed.is_empty() && is_absolute(path) {
        "/"
    } else {
        trimmed
    }
}

/// Join a directory and a relative path with exactly one separator between them.
pub fn join(dir: &str, relative: &str) -> String {
    let relative = relative.trim_start_matches(SEPARATOR);
    if dir.is_empty() {
        return relative.to_string();
    }
    if has_trailing_slash(dir) {
        format!("{dir}{relative}")
    } else {
        format!("{dir}{SEPARATOR}{relative}")
    }
}

/// Parent directory of a path, with a trailing slash.
///
/// `"/my/file.txt"` gives `"/my/"`, `"/file"` gives `"/"`, and the root has no parent.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = trim_trailing_slashes(path);
    if trimmed == "/" || trimmed.is_empty() {
        return None;
    }
    trimmed.rfind(SEPARATOR).map(|idx| &trimmed[..=idx])
}

/// Last component of a path, ignoring trailing slashes.
pub fn file_name(path: &str) -> &str {
    let trimmed = trim_trailing_slashes(path);
    match trimmed.rfind(SEPARATOR) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Split a path into its non-empty components.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split(SEPARATOR).filter(|c| !c.is_empty())
}

/// Check if `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    let path = trim_trailing_slashes(path);
    let ancestor = trim_trailing_slashes(ancestor);
    if ancestor == "/" {
        return is_absolute(path);
    }
    path == ancestor
        || (path.starts_with(ancestor) && path[ancestor.len()..].starts_with(SEPARATOR))
}

/// Case-insensitive path comparison, ignoring trailing slashes.
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    trim_trailing_slashes(a).to_lowercase() == trim_trailing_slashes(b).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_file_name() {
        assert_eq!(parent("/my/file.txt"), Some("/my/"));
        assert_eq!(parent("/my/dir/"), Some("/my/"));
        assert_eq!(parent("/file"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(file_name("/my/file.txt///"), "file.txt");
        assert_eq!(file_name("name"), "name");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/out/", "dir/a.txt"), "/out/dir/a.txt");
        assert_eq!(join("/out", "/dir"), "/out/dir");
        assert_eq!(join("", "dir"), "dir");
    }

    #[test]
    fn test_trailing_slashes() {
        assert_eq!(trim_trailing_slashes("/a/b///"), "/a/b");
        assert_eq!(trim_trailing_slashes("///"), "/");
        assert_eq!(ensure_trailing_slash("/a"), "/a/");
        assert_eq!(ensure_trailing_slash("/a/"), "/a/");
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/a/b/c", "/a/b"));
        assert!(is_within("/a/b", "/a/b/"));
        assert!(!is_within("/a/bc", "/a/b"));
        assert!(is_within("/anything", "/"));
    }

    #[test]
    fn test_eq_ignore_case() {
        assert!(eq_ignore_case("/out/dir", "/out/Dir/"));
        assert!(!eq_ignore_case("/out/dir", "/out/dir2"));
    }
}
