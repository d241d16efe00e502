use std::fs;
use std::io::Write;

use ferry_core::{
    CancellationToken, Host, HostExt, OpenFlags, StatFlags, VfsErrorKind,
};
use ferry_vfs::{ArchiveFormat, ArchiveHost, MemHost, NativeHost, split_archive_location};
use tempfile::TempDir;

fn native_path(dir: &TempDir, rel: &str) -> String {
    dir.path().join(rel).to_string_lossy().into_owned()
}

fn build_tar(dir: &TempDir) -> String {
    let archive_path = native_path(dir, "bundle.tar");
    let file = fs::File::create(&archive_path).unwrap();
    let mut builder = tar::Builder::new(file);

    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o640);
    header.set_cksum();
    builder
        .append_data(&mut header, "docs/readme.txt", &b"hello"[..])
        .unwrap();

    let mut header = tar::Header::new_gnu();
    header.set_size(3);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "top.bin", &b"abc"[..]).unwrap();
    builder.finish().unwrap();

    archive_path
}

#[test]
fn test_native_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let host = NativeHost::shared();
    let cancel = CancellationToken::new();
    let path = native_path(&dir, "data.bin");

    let mut file = host.create_file(&path, &cancel).unwrap();
    file.open(OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::NO_EXIST, &cancel)
        .unwrap();
    file.write_all(b"payload").unwrap();
    file.close().unwrap();

    let mut file = host.create_file(&path, &cancel).unwrap();
    file.open(OpenFlags::READ, &cancel).unwrap();
    assert_eq!(file.size().unwrap(), 7);
    let mut buf = vec![0u8; 16];
    let n = file.read_full(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"payload");
}

#[test]
fn test_native_rmdir_not_empty_kind() {
    let dir = tempfile::tempdir().unwrap();
    let host = NativeHost::shared();
    let cancel = CancellationToken::new();
    let sub = native_path(&dir, "sub");
    fs::create_dir(&sub).unwrap();
    fs::File::create(dir.path().join("sub/f")).unwrap().write_all(b"x").unwrap();

    let err = host.remove_directory(&sub, &cancel).unwrap_err();
    assert_eq!(err.kind(), VfsErrorKind::DirectoryNotEmpty);
}

#[test]
fn test_native_listing_is_sorted() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b", "a", "C"] {
        fs::write(dir.path().join(name), name).unwrap();
    }
    let host = NativeHost::shared();
    let cancel = CancellationToken::new();
    let listing = host
        .fetch_directory_listing(&dir.path().to_string_lossy(), &cancel)
        .unwrap();
    let names: Vec<String> = listing.items().map(|i| i.filename().to_string()).collect();
    assert_eq!(names, vec!["C", "a", "b"]);
}

#[test]
fn test_native_statfs_volume_matches_dev() {
    let dir = tempfile::tempdir().unwrap();
    let host = NativeHost::shared();
    let cancel = CancellationToken::new();
    let root = dir.path().to_string_lossy().into_owned();

    let stat = host.stat(&root, StatFlags::empty(), &cancel).unwrap();
    let fs_stats = host
        .statfs(&format!("{root}/not/yet/created/"), &cancel)
        .unwrap();
    assert_eq!(stat.dev, fs_stats.volume_id);
}

#[test]
fn test_tar_archive_mount_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = build_tar(&dir);
    let native = NativeHost::shared();
    let cancel = CancellationToken::new();

    let archive = ArchiveHost::mount(native.clone(), &archive_path, &cancel).unwrap();
    assert!(!archive.is_writable());

    let root = archive.fetch_directory_listing("/", &cancel).unwrap();
    let names: Vec<String> = root.items().map(|i| i.filename().to_string()).collect();
    assert_eq!(names, vec!["docs", "top.bin"]);
    assert!(root.item(0).unwrap().is_dir());

    let stat = archive
        .stat("/docs/readme.txt", StatFlags::empty(), &cancel)
        .unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.permissions(), 0o640);

    let mut file = archive.create_file("/docs/readme.txt", &cancel).unwrap();
    file.open(OpenFlags::READ, &cancel).unwrap();
    let mut buf = [0u8; 8];
    let n = file.read_full(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");

    let stack = archive.path_stack("/docs/");
    assert_eq!(stack.verbose_string(), format!("{archive_path}:/docs/"));
}

#[test]
fn test_archive_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let archive_path = build_tar(&dir);
    let cancel = CancellationToken::new();
    let archive = ArchiveHost::mount(NativeHost::shared(), &archive_path, &cancel).unwrap();

    let err = archive.create_directory("/new", 0o755, &cancel).unwrap_err();
    assert_eq!(err.kind(), VfsErrorKind::ReadOnly);

    let mut file = archive.create_file("/top.bin", &cancel).unwrap();
    let err = file.open(OpenFlags::WRITE, &cancel).unwrap_err();
    assert_eq!(err.kind(), VfsErrorKind::ReadOnly);
}

#[test]
fn test_zip_archive_on_memory_host() {
    let mut bytes = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut bytes);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("notes/a.txt", options).unwrap();
        writer.write_all(b"zipped").unwrap();
        writer.finish().unwrap();
    }

    let mem = MemHost::new();
    mem.add_file("/pack.zip", bytes.into_inner()).unwrap();
    let host = mem.shared();
    let cancel = CancellationToken::new();

    let archive = ArchiveHost::mount(host, "/pack.zip", &cancel).unwrap();
    let listing = archive.fetch_directory_listing("/notes", &cancel).unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing.item(0).unwrap().size(), 6);
}

#[test]
fn test_split_archive_location() {
    assert_eq!(
        split_archive_location("/tmp/a.tar.gz:/docs"),
        Some(("/tmp/a.tar.gz", "/docs"))
    );
    assert_eq!(split_archive_location("/tmp/a.zip:"), Some(("/tmp/a.zip", "/")));
    assert_eq!(split_archive_location("/tmp/plain:/x"), None);
    assert_eq!(ArchiveFormat::from_path("/x/Y.TGZ"), Some(ArchiveFormat::TarGz));
}
