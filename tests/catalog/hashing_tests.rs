// Tests for the hash lifecycle

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::tempdir;
use volcat::catalog::error::Result;
use volcat::catalog::{
    Catalog, CatalogError, ContentDigest, EntryKey, EntryKind, HashJob, SelectCursor, Sha256Digest,
};
use volcat::paths;

use crate::common::{catalog, dir, file, file_in, key, set_hash, write_file};

const HELLO_WORLD_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

/// Fails for any file whose name contains "locked", hashes the rest.
struct LockedDigest;

impl ContentDigest for LockedDigest {
    fn digest_file(&self, path: &Path) -> Result<String> {
        if path.to_string_lossy().contains("locked") {
            return Err(CatalogError::Digest {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
            });
        }
        Sha256Digest.digest_file(path)
    }
}

/// Catalog a temp volume holding `files` (relative path, content).
fn volume_with(files: &[(&str, &str)]) -> (tempfile::TempDir, String, Catalog) {
    let root = tempdir().unwrap();
    let volume = paths::volume_label(root.path());
    let mut catalog = catalog();
    let mut entries = Vec::new();
    for (relative, content) in files {
        write_file(root.path(), relative, content.as_bytes());
        entries.push(file_in(&volume, relative, 0, 0));
    }
    catalog.reconcile(&entries).unwrap();
    (root, volume, catalog)
}

#[test]
fn test_select_modified_orders_by_size() {
    let mut catalog = catalog();
    catalog
        .reconcile(&[
            file("big.bin", 300, 1),
            file("small.txt", 10, 1),
            file("medium.dat", 200, 1),
            file("done.txt", 1, 1),
        ])
        .unwrap();
    set_hash(&mut catalog, &key("done.txt"), "h");

    let selected = catalog.select_modified(100).unwrap();
    let sizes: Vec<u64> = selected.iter().map(|f| f.meta.size).collect();
    assert_eq!(sizes, vec![10, 200, 300]);

    let first_two = catalog.select_modified(2).unwrap();
    assert_eq!(first_two.len(), 2);

    let rest = catalog
        .select_modified_after(Some(&SelectCursor::after(&first_two[1])), 100)
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].key.path, "big.bin");
}

#[test]
fn test_select_modified_includes_stale_hashes() {
    let mut catalog = catalog();
    catalog.reconcile(&[file("a.txt", 10, 1)]).unwrap();
    set_hash(&mut catalog, &key("a.txt"), "h1");
    assert!(catalog.select_modified(10).unwrap().is_empty());

    catalog.reconcile(&[file("a.txt", 11, 2)]).unwrap();
    let selected = catalog.select_modified(10).unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].content_hash.as_deref(), Some("h1"));
}

#[test]
fn test_hash_job_hashes_and_refreshes_metadata() {
    let (_root, volume, mut catalog) = volume_with(&[("docs/hello.txt", "hello world"), ("b.txt", "b")]);

    let stats = HashJob::new().run(&mut catalog).unwrap();
    assert_eq!(stats.hashed, 2);
    assert_eq!(stats.saved, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.bytes_hashed, 12);
    assert!(!stats.interrupted);

    let hello = catalog
        .get_file(&EntryKey::new(volume.clone(), "docs/hello.txt"))
        .unwrap()
        .unwrap();
    assert_eq!(hello.content_hash.as_deref(), Some(HELLO_WORLD_SHA256));
    assert!(!hello.rehash_pending);
    assert_eq!(hello.meta.size, 11);
    assert_eq!(hello.parent, "docs");

    assert!(catalog.select_modified(10).unwrap().is_empty());
    let again = HashJob::new().run(&mut catalog).unwrap();
    assert_eq!(again.hashed, 0);
}

#[test]
fn test_vanished_file_is_deleted_and_skipped() {
    let (root, volume, mut catalog) = volume_with(&[("a.txt", "aaa"), ("keep.txt", "k")]);
    std::fs::remove_file(root.path().join("a.txt")).unwrap();

    let stats = HashJob::new().run(&mut catalog).unwrap();
    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.hashed, 1);
    assert!(catalog
        .get_file(&EntryKey::new(volume.clone(), "a.txt"))
        .unwrap()
        .is_none());
    assert_eq!(catalog.count(EntryKind::File).unwrap(), 1);
}

#[test]
fn test_digest_failure_keeps_entry_eligible() {
    let (_root, volume, mut catalog) = volume_with(&[("locked.bin", "secret"), ("open.txt", "o")]);

    let job = HashJob::with_digest(LockedDigest).with_limit(1);
    let stats = job.run(&mut catalog).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.hashed, 1);

    let locked = catalog
        .get_file(&EntryKey::new(volume.clone(), "locked.bin"))
        .unwrap()
        .unwrap();
    assert_eq!(locked.content_hash, None);

    // Retried by the next run, and the run still terminates
    let selected = catalog.select_modified(10).unwrap();
    assert_eq!(selected.len(), 1);
    let stats = job.run(&mut catalog).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.hashed, 0);
}

#[test]
fn test_flush_on_item_count() {
    let (_root, _volume, mut catalog) = volume_with(&[("a", "1"), ("b", "22"), ("c", "333")]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_callback = Arc::clone(&seen);

    let stats = HashJob::new()
        .with_flush_interval(Duration::from_secs(3600))
        .with_flush_max_items(1)
        .with_progress_callback(move |stats| seen_callback.lock().unwrap().push(stats.saved))
        .run(&mut catalog)
        .unwrap();

    assert_eq!(stats.saved, 3);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&1));
}

#[test]
fn test_stop_flag_interrupts_between_batches() {
    let (_root, _volume, mut catalog) = volume_with(&[("a", "1"), ("b", "22"), ("c", "333")]);

    let stop = Arc::new(AtomicBool::new(true));
    let stats = HashJob::new()
        .with_stop_flag(Arc::clone(&stop))
        .run(&mut catalog)
        .unwrap();
    assert!(stats.interrupted);
    assert_eq!(stats.hashed, 0);

    stop.store(false, Ordering::Relaxed);
    let stop_after_first = Arc::clone(&stop);
    let stats = HashJob::new()
        .with_flush_max_items(1)
        .with_stop_flag(Arc::clone(&stop))
        .with_progress_callback(move |_| stop_after_first.store(true, Ordering::Relaxed))
        .run(&mut catalog)
        .unwrap();
    assert!(stats.interrupted);
    assert!(stats.hashed < 3);
    assert_eq!(stats.saved, stats.hashed);
    assert_eq!(catalog.select_modified(10).unwrap().len(), 3 - stats.hashed);
}

#[test]
fn test_hash_job_recounts_duplicates() {
    let root = tempdir().unwrap();
    let volume = paths::volume_label(root.path());
    write_file(root.path(), "dir1/x.txt", b"same");
    write_file(root.path(), "dir1/y.txt", b"same");
    write_file(root.path(), "dir1/z.txt", b"unique");

    let mut catalog = catalog();
    catalog
        .reconcile(&[
            file_in(&volume, "dir1/x.txt", 0, 0),
            file_in(&volume, "dir1/y.txt", 0, 0),
            file_in(&volume, "dir1/z.txt", 0, 0),
        ])
        .unwrap();
    let mut dir1 = dir("dir1");
    dir1.key.volume = volume.clone();
    catalog.reconcile(&[dir1]).unwrap();

    let stats = HashJob::new().run(&mut catalog).unwrap();
    assert_eq!(stats.dirs_recounted, 1);
    let dir1 = catalog
        .get_dir(&EntryKey::new(volume.clone(), "dir1"))
        .unwrap()
        .unwrap();
    assert_eq!(dir1.duplicate_count, Some(2));
}

#[test]
fn test_write_hashed_does_not_resurrect_rows() {
    let mut catalog = catalog();
    catalog.reconcile(&[file("a.txt", 1, 1)]).unwrap();
    let mut stored = catalog.get_file(&key("a.txt")).unwrap().unwrap();
    catalog.delete_entry(EntryKind::File, &key("a.txt")).unwrap();

    stored.content_hash = Some("h".to_string());
    assert_eq!(catalog.write_hashed(&[stored]).unwrap(), 0);
    assert!(catalog.get_file(&key("a.txt")).unwrap().is_none());
}
