// Shared fixtures for catalog tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use volcat::catalog::{Catalog, DirEntry, EntryKey, FileEntry, Metadata};

pub const VOLUME: &str = "v1";

pub fn catalog() -> Catalog {
    Catalog::open_in_memory().unwrap()
}

pub fn key(path: &str) -> EntryKey {
    EntryKey::new(VOLUME, path)
}

pub fn file(path: &str, size: u64, mtime: i64) -> FileEntry {
    file_in(VOLUME, path, size, mtime)
}

pub fn file_in(volume: &str, path: &str, size: u64, mtime: i64) -> FileEntry {
    FileEntry::new(EntryKey::new(volume, path), Metadata::new(size, mtime, mtime, mtime))
}

pub fn dir(path: &str) -> DirEntry {
    DirEntry::new(key(path), Metadata::new(0, 1_600_000_000, 1_600_000_000, 1_600_000_000))
}

/// Store a hash for an already catalogued file and clear its rehash flag.
pub fn set_hash(catalog: &mut Catalog, key: &EntryKey, hash: &str) {
    let mut stored = catalog.get_file(key).unwrap().expect("file is catalogued");
    stored.content_hash = Some(hash.to_string());
    stored.rehash_pending = false;
    assert_eq!(catalog.write_hashed(&[stored]).unwrap(), 1);
}

/// Write `content` below `root`, creating parent directories.
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
