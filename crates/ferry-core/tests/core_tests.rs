use std::sync::Arc;

use ferry_core::{
    CancellationToken, DirEntry, FsStats, Host, HostExt, HostOptions, HostRef, ItemKind, Stat,
    StatFlags, VfsErrorKind, VfsFile, VfsResult,
};

/// Host serving a fixed set of stat records.
#[derive(Debug)]
struct StubHost {
    tag: &'static str,
    junction: String,
    parent: Option<HostRef>,
    options: Option<HostOptions>,
}

impl StubHost {
    fn root() -> HostRef {
        Arc::new(Self {
            tag: "native",
            junction: String::new(),
            parent: None,
            options: None,
        })
    }

    fn mounted(parent: &HostRef, junction: &str, options: Option<HostOptions>) -> HostRef {
        Arc::new(Self {
            tag: "arc",
            junction: junction.to_string(),
            parent: Some(parent.clone()),
            options,
        })
    }
}

impl Host for StubHost {
    fn tag(&self) -> &'static str {
        self.tag
    }

    fn junction_path(&self) -> &str {
        &self.junction
    }

    fn parent(&self) -> Option<&HostRef> {
        self.parent.as_ref()
    }

    fn options(&self) -> Option<HostOptions> {
        self.options.clone()
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn stat(&self, path: &str, _flags: StatFlags, _cancel: &CancellationToken) -> VfsResult<Stat> {
        match path {
            "/my/file.txt" => Ok(Stat::new(ItemKind::File, 0o644, 42)),
            "/my" | "/" => Ok(Stat::new(ItemKind::Directory, 0o755, 0)),
            _ => Err(ferry_core::VfsError::new(VfsErrorKind::NotFound, path)),
        }
    }

    fn read_directory(&self, _path: &str, _cancel: &CancellationToken) -> VfsResult<Vec<DirEntry>> {
        Ok(vec![
            DirEntry::new("zeta", Stat::new(ItemKind::File, 0o644, 1)),
            DirEntry::new("alpha", Stat::new(ItemKind::Directory, 0o755, 0)),
            DirEntry::new("Beta", Stat::new(ItemKind::File, 0o644, 2)),
        ])
    }

    fn create_file(&self, path: &str, _cancel: &CancellationToken) -> VfsResult<Box<dyn VfsFile>> {
        Err(self.unsupported(path))
    }

    fn statfs(&self, _path: &str, _cancel: &CancellationToken) -> VfsResult<FsStats> {
        Ok(FsStats {
            volume_id: 1,
            total_bytes: 0,
            free_bytes: 0,
            avail_bytes: 0,
            volume_name: "stub".into(),
            case_sensitive: true,
        })
    }
}

#[test]
fn test_single_item_listing_requires_absolute_path() {
    let host = StubHost::root();
    let cancel = CancellationToken::new();
    let err = host
        .fetch_single_item_listing("not absolute path", &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), VfsErrorKind::InvalidPath);
}

#[test]
fn test_single_item_listing_of_regular_file() {
    let host = StubHost::root();
    let cancel = CancellationToken::new();
    let listing = host
        .fetch_single_item_listing("/my/file.txt", &cancel)
        .unwrap();

    assert!(listing.host().is_same_host(&host));
    assert_eq!(listing.len(), 1);
    assert_eq!(listing.directory(), "/my/");

    let item = listing.item(0).unwrap();
    assert_eq!(item.directory(), "/my/");
    assert_eq!(item.filename(), "file.txt");
    assert_eq!(item.size(), 42);
    assert!(item.is_reg());
    assert_eq!(item.path(), "/my/file.txt");
}

#[test]
fn test_single_item_listing_removes_trailing_slashes() {
    let host = StubHost::root();
    let cancel = CancellationToken::new();
    let listing = host
        .fetch_single_item_listing("/my/file.txt///", &cancel)
        .unwrap();

    assert_eq!(listing.directory(), "/my/");
    assert_eq!(listing.item(0).unwrap().filename(), "file.txt");
}

#[test]
fn test_directory_listing_is_sorted_bytewise() {
    let host = StubHost::root();
    let cancel = CancellationToken::new();
    let listing = host.fetch_directory_listing("/my", &cancel).unwrap();

    let names: Vec<String> = listing.items().map(|i| i.filename().to_string()).collect();
    assert_eq!(names, vec!["Beta", "alpha", "zeta"]);
    assert_eq!(listing.directory(), "/my/");
}

#[test]
fn test_path_stack_identity_and_weak_equality() {
    let root = StubHost::root();
    let options = HostOptions::new().with("format", "tar");
    let a = StubHost::mounted(&root, "/tmp/a.tar", Some(options.clone()));
    let b = StubHost::mounted(&root, "/tmp/a.tar", Some(options));
    let c = StubHost::mounted(&root, "/tmp/c.tar", None);

    let stack_a = a.path_stack("/docs/");
    let stack_b = b.path_stack("/docs/");
    let stack_c = c.path_stack("/docs/");

    assert_eq!(stack_a.parts().len(), 2);
    assert_ne!(stack_a, stack_b);
    assert!(stack_a.weak_equal(&stack_b));
    assert!(!stack_a.weak_equal(&stack_c));
    assert_eq!(stack_a, a.path_stack("/docs/"));
    assert_eq!(stack_a.verbose_string(), "/tmp/a.tar:/docs/");
}

#[test]
fn test_unsupported_on_read_only_host() {
    let host = StubHost::root();
    let cancel = CancellationToken::new();
    let err = host.unlink("/my/file.txt", &cancel).unwrap_err();
    assert_eq!(err.kind(), VfsErrorKind::ReadOnly);
}
