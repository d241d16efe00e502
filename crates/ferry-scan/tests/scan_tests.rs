use std::fs;

use ferry_core::{
    CancellationToken, ErrorCategory, ErrorResolver, FixedResolver, HostExt, HostRef, ListingItem,
    Prompt, Resolution, ScanError,
};
use ferry_scan::{SourceItems, SourceItemsScanner};
use ferry_vfs::{MemHost, NativeHost};

/// Resolver that records every prompt and answers from a script.
struct Scripted {
    answers: Vec<Resolution>,
    seen: Vec<(ErrorCategory, String)>,
}

impl ErrorResolver for Scripted {
    fn resolve(&mut self, prompt: &Prompt<'_>) -> Resolution {
        self.seen.push((prompt.category, prompt.path.to_string()));
        if self.answers.is_empty() {
            Resolution::Abort
        } else {
            self.answers.remove(0)
        }
    }
}

fn top_items(host: &HostRef, paths: &[&str]) -> Vec<ListingItem> {
    let cancel = CancellationToken::new();
    paths
        .iter()
        .map(|p| {
            let listing = host.fetch_single_item_listing(p, &cancel).unwrap();
            listing.item(0).unwrap()
        })
        .collect()
}

fn relative_paths(db: &SourceItems) -> Vec<String> {
    (0..db.len()).map(|i| db.compose_relative_path(i)).collect()
}

fn sample_host() -> (MemHost, HostRef) {
    let mem = MemHost::new();
    mem.add_file("/src/tree/b.txt", "bb").unwrap();
    mem.add_file("/src/tree/a/one.txt", "1").unwrap();
    mem.add_file("/src/tree/a/two.txt", "22").unwrap();
    mem.add_dirs("/src/tree/empty").unwrap();
    mem.add_symlink("/src/tree/link", "b.txt").unwrap();
    mem.add_file("/src/loose.bin", "xyz").unwrap();
    let host = mem.clone().shared();
    (mem, host)
}

#[test]
fn test_scan_is_pre_ordered_and_sorted() {
    let (_mem, host) = sample_host();
    let items = top_items(&host, &["/src/tree", "/src/loose.bin"]);
    let scanner = SourceItemsScanner::new();
    let mut resolver = FixedResolver::new(Resolution::Abort);
    let db = scanner
        .scan(&items, |_| true, &mut resolver, &CancellationToken::new())
        .unwrap();

    assert_eq!(
        relative_paths(&db),
        vec![
            "tree",
            "tree/a",
            "tree/a/one.txt",
            "tree/a/two.txt",
            "tree/b.txt",
            "tree/empty",
            "tree/link",
            "loose.bin",
        ]
    );
    for i in 0..db.len() {
        if let Some(parent) = db.get(i).unwrap().parent {
            assert!(parent < i);
        }
    }
    assert_eq!(db.total_bytes(), 1 + 2 + 2 + 3);
    assert_eq!(db.files_count(), 4);
    assert_eq!(db.directories_count(), 3);
    assert_eq!(db.symlinks_count(), 1);
    assert_eq!(db.source_path(2), "/src/tree/a/one.txt");

    let link = db.get(6).unwrap();
    assert!(link.is_symlink());
    assert_eq!(link.symlink_target.as_deref(), Some("b.txt"));
}

#[test]
fn test_unexpanded_directory_then_expand() {
    let (_mem, host) = sample_host();
    let items = top_items(&host, &["/src/tree", "/src/loose.bin"]);
    let scanner = SourceItemsScanner::new();
    let mut resolver = FixedResolver::new(Resolution::Abort);
    let cancel = CancellationToken::new();

    let mut db = scanner
        .scan(&items, |_| false, &mut resolver, &cancel)
        .unwrap();
    assert_eq!(relative_paths(&db), vec!["tree", "loose.bin"]);

    let added = scanner
        .expand_directory(&mut db, 0, &mut resolver, &cancel)
        .unwrap();
    assert_eq!(added, 6);
    assert_eq!(db.compose_relative_path(7), "loose.bin");
    assert_eq!(db.compose_relative_path(3), "tree/a/two.txt");
    assert_eq!(db.total_bytes(), 8);
}

#[test]
fn test_unreadable_directory_skip_keeps_directory() {
    let (mem, host) = sample_host();
    mem.set_mode("/src/tree/a", 0o300).unwrap();
    let items = top_items(&host, &["/src/tree"]);
    let scanner = SourceItemsScanner::new();
    let mut resolver = Scripted {
        answers: vec![Resolution::Skip],
        seen: Vec::new(),
    };

    let mut db = scanner
        .scan(&items, |_| true, &mut resolver, &CancellationToken::new())
        .unwrap();

    assert_eq!(resolver.seen, vec![(ErrorCategory::Scan, "/src/tree/a".to_string())]);
    assert!(relative_paths(&db).contains(&"tree/a".to_string()));
    assert!(!relative_paths(&db).contains(&"tree/a/one.txt".to_string()));

    let skipped = db.take_skipped();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].path, "/src/tree/a");
    assert!(db.take_skipped().is_empty());
}

#[test]
fn test_expand_records_skipped_subdirectory() {
    let (mem, host) = sample_host();
    mem.set_mode("/src/tree/a", 0o300).unwrap();
    let items = top_items(&host, &["/src/tree"]);
    let scanner = SourceItemsScanner::new();
    let cancel = CancellationToken::new();
    let mut resolver = FixedResolver::new(Resolution::Skip);

    let mut db = scanner
        .scan(&items, |_| false, &mut resolver, &cancel)
        .unwrap();
    assert!(db.take_skipped().is_empty());

    scanner
        .expand_directory(&mut db, 0, &mut resolver, &cancel)
        .unwrap();
    let skipped: Vec<String> = db.take_skipped().into_iter().map(|s| s.path).collect();
    assert_eq!(skipped, vec!["/src/tree/a"]);
}

#[test]
fn test_unreadable_directory_abort_stops_scan() {
    let (mem, host) = sample_host();
    mem.set_mode("/src/tree/a", 0o300).unwrap();
    let items = top_items(&host, &["/src/tree"]);
    let scanner = SourceItemsScanner::new();
    let mut resolver = FixedResolver::new(Resolution::Abort);

    let err = scanner
        .scan(&items, |_| true, &mut resolver, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ScanError::Stopped { path } if path == "/src/tree/a"));
}

#[test]
fn test_retry_after_fix() {
    let (mem, host) = sample_host();
    mem.set_mode("/src/tree/a", 0o300).unwrap();
    let items = top_items(&host, &["/src/tree"]);
    let scanner = SourceItemsScanner::new();

    struct FixThenRetry(MemHost);
    impl ErrorResolver for FixThenRetry {
        fn resolve(&mut self, _prompt: &Prompt<'_>) -> Resolution {
            self.0.set_mode("/src/tree/a", 0o755).unwrap();
            Resolution::Retry
        }
    }

    let db = scanner
        .scan(&items, |_| true, &mut FixThenRetry(mem), &CancellationToken::new())
        .unwrap();
    assert!(relative_paths(&db).contains(&"tree/a/two.txt".to_string()));
}

#[test]
fn test_cancelled_scan() {
    let (_mem, host) = sample_host();
    let items = top_items(&host, &["/src/tree"]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = SourceItemsScanner::new()
        .scan(&items, |_| true, &mut FixedResolver::new(Resolution::Skip), &cancel)
        .unwrap_err();
    assert!(matches!(err, ScanError::Cancelled));
}

#[test]
fn test_native_scan_records_devices() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("d")).unwrap();
    fs::write(dir.path().join("d/f.txt"), "hello").unwrap();

    let host = NativeHost::shared();
    let root = dir.path().join("d").to_string_lossy().into_owned();
    let items = top_items(&host, &[root.as_str()]);
    let db = SourceItemsScanner::new()
        .scan(
            &items,
            |_| true,
            &mut FixedResolver::new(Resolution::Abort),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(db.len(), 2);
    assert_ne!(db.get(1).unwrap().ino, 0);
    assert_eq!(db.get(0).unwrap().dev, db.get(1).unwrap().dev);
}

#[tokio::test]
async fn test_progress_is_broadcast() {
    let (_mem, host) = sample_host();
    let items = top_items(&host, &["/src/tree"]);
    let scanner = SourceItemsScanner::new();
    let mut rx = scanner.subscribe();

    scanner
        .scan(
            &items,
            |_| true,
            &mut FixedResolver::new(Resolution::Abort),
            &CancellationToken::new(),
        )
        .unwrap();

    let progress = rx.recv().await.unwrap();
    assert_eq!(progress.files_scanned, 3);
    assert_eq!(progress.dirs_scanned, 3);
}
