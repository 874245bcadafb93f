// Tests for the volume scanner feeding the reconciler

use std::fs;

use tempfile::tempdir;
use volcat::catalog::{EntryKey, EntryKind};
use volcat::exclude::ExcludePatterns;
use volcat::paths;
use volcat::scan::{ScanListing, Scanner};

use crate::common::{catalog, dir, file, file_in, write_file, VOLUME};

#[test]
fn test_scan_lists_files_and_dirs() {
    let root = tempdir().unwrap();
    write_file(root.path(), "photos/2021/a.jpg", b"jpeg");
    write_file(root.path(), "notes.txt", b"hi");
    fs::create_dir_all(root.path().join("empty")).unwrap();

    let (listing, stats) = Scanner::new().scan(&[root.path().to_path_buf()]);
    assert_eq!(stats.volumes_scanned, 1);
    assert_eq!(stats.files, 2);
    assert_eq!(stats.dirs, 3);
    assert_eq!(stats.total_bytes, 6);

    let volume = paths::volume_label(root.path());
    let a = listing
        .files
        .iter()
        .find(|f| f.key.path == "photos/2021/a.jpg")
        .expect("nested file listed");
    assert_eq!(a.key.volume, volume);
    assert_eq!(a.parent, "photos/2021");
    assert_eq!(a.meta.size, 4);

    let mut dirs: Vec<&str> = listing.dirs.iter().map(|d| d.key.path.as_str()).collect();
    dirs.sort();
    assert_eq!(dirs, vec!["empty", "photos", "photos/2021"]);
}

#[test]
fn test_scan_skips_denylist_and_excludes() {
    let root = tempdir().unwrap();
    write_file(root.path(), "@appstore/app.bin", b"x");
    write_file(root.path(), "music/@eaDir/cover.jpg", b"x");
    write_file(root.path(), "music/song.flac", b"flac");
    write_file(root.path(), "music/@keep.txt", b"x");

    let scanner = Scanner::new()
        .with_denylist(vec!["@".to_string(), String::new()])
        .with_exclude(ExcludePatterns::with_defaults());
    assert!(scanner.is_denied("@appstore"));
    assert!(!scanner.is_denied("music"));

    let (listing, _) = scanner.scan(&[root.path().to_path_buf()]);
    let mut files: Vec<&str> = listing.files.iter().map(|f| f.key.path.as_str()).collect();
    files.sort();
    // The denylist applies to top-level names only
    assert_eq!(files, vec!["music/@keep.txt", "music/song.flac"]);
    let dirs: Vec<&str> = listing.dirs.iter().map(|d| d.key.path.as_str()).collect();
    assert_eq!(dirs, vec!["music"]);
}

#[cfg(unix)]
#[test]
fn test_scan_skips_symlinks() {
    let root = tempdir().unwrap();
    write_file(root.path(), "real.txt", b"data");
    std::os::unix::fs::symlink(root.path().join("real.txt"), root.path().join("link.txt")).unwrap();

    let (listing, _) = Scanner::new().scan(&[root.path().to_path_buf()]);
    let files: Vec<&str> = listing.files.iter().map(|f| f.key.path.as_str()).collect();
    assert_eq!(files, vec!["real.txt"]);
}

#[test]
fn test_missing_volume_keeps_catalogued_rows() {
    let present = tempdir().unwrap();
    let gone = tempdir().unwrap();
    write_file(present.path(), "a.txt", b"a");
    write_file(gone.path(), "b.txt", b"b");

    let volumes = vec![present.path().to_path_buf(), gone.path().to_path_buf()];
    let mut catalog = catalog();
    let (listing, _) = Scanner::new().scan(&volumes);
    catalog.reconcile(&listing.files).unwrap();
    assert_eq!(catalog.count(EntryKind::File).unwrap(), 2);

    let gone_volume = paths::volume_label(gone.path());
    let gone_path = gone.path().to_path_buf();
    drop(gone);

    let (listing, stats) = Scanner::new().scan(&volumes);
    assert_eq!(stats.volumes_missing, 1);
    assert!(!gone_path.exists());
    catalog.reconcile(&listing.files).unwrap();
    assert!(catalog
        .get_file(&EntryKey::new(gone_volume, "b.txt"))
        .unwrap()
        .is_some());
}

#[test]
fn test_rescan_after_change_flags_rehash() {
    let root = tempdir().unwrap();
    write_file(root.path(), "doc.txt", b"v1");
    let volumes = vec![root.path().to_path_buf()];
    let volume = paths::volume_label(root.path());

    let mut catalog = catalog();
    let (listing, _) = Scanner::new().scan(&volumes);
    catalog.reconcile(&listing.files).unwrap();
    volcat::catalog::HashJob::new().run(&mut catalog).unwrap();
    let key = EntryKey::new(volume, "doc.txt");
    assert!(!catalog.get_file(&key).unwrap().unwrap().needs_hash());

    write_file(root.path(), "doc.txt", b"version two");
    let (listing, _) = Scanner::new().scan(&volumes);
    let report = catalog.reconcile(&listing.files).unwrap();
    assert_eq!(report.rehash_flagged, 1);
    assert!(catalog.get_file(&key).unwrap().unwrap().rehash_pending);
}

#[test]
fn test_listing_without_volumes() {
    let mut listing = ScanListing {
        files: vec![file("a.txt", 1, 10), file_in("v2", "b.txt", 2, 10)],
        dirs: vec![dir("photos")],
    };
    assert_eq!(listing.without_volumes(&["v2".to_string()]), 1);
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].key.volume, VOLUME);
    assert_eq!(listing.dirs.len(), 1);

    assert_eq!(listing.without_volumes(&[VOLUME.to_string()]), 2);
    assert!(listing.files.is_empty() && listing.dirs.is_empty());
}

#[cfg(unix)]
#[test]
fn test_unreadable_subtree_keeps_catalogued_rows() {
    use std::os::unix::fs::PermissionsExt;

    let root = tempdir().unwrap();
    write_file(root.path(), "open.txt", b"o");
    write_file(root.path(), "locked/inner.txt", b"i");
    let volumes = vec![root.path().to_path_buf()];
    let volume = paths::volume_label(root.path());

    let mut catalog = catalog();
    let (listing, _) = Scanner::new().scan(&volumes);
    catalog.reconcile(&listing.files).unwrap();
    catalog.reconcile(&listing.dirs).unwrap();
    assert_eq!(catalog.count(EntryKind::File).unwrap(), 2);

    let locked = root.path().join("locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    // Permission bits do not stop a privileged user
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let (listing, stats) = Scanner::new().scan(&volumes);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert!(stats.errors > 0);
    assert_eq!(stats.incomplete_volumes, vec![volume.clone()]);
    assert!(listing.files.is_empty());
    assert!(listing.dirs.is_empty());

    let report = catalog.reconcile(&listing.files).unwrap();
    assert_eq!(report.deleted, 0);
    assert!(catalog
        .get_file(&EntryKey::new(volume, "locked/inner.txt"))
        .unwrap()
        .is_some());
    assert_eq!(catalog.count(EntryKind::File).unwrap(), 2);
}
