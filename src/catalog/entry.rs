//! Entity model shared by every catalog component.
//!
//! Identity is the `(volume, path)` pair carried by [`EntryKey`]. Two entries
//! with the same key and different metadata are two versions of the same
//! entity; nothing else participates in equality.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;

use crate::paths;

/// Which table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Name of the backing table.
    pub fn table(self) -> &'static str {
        match self {
            EntryKind::File => "files",
            EntryKind::Directory => "dirs",
        }
    }
}

/// Composite catalog key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct EntryKey {
    /// Storage root label (the volume mount path).
    pub volume: String,
    /// Path relative to the volume, forward-slash separated.
    pub path: String,
}

impl EntryKey {
    pub fn new(volume: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            path: path.into(),
        }
    }

    /// Containing directory derived from the path.
    pub fn parent_path(&self) -> String {
        paths::parent_of(&self.path)
    }

    /// Location of this entry on the live filesystem.
    pub fn full_path(&self) -> PathBuf {
        paths::resolve(&self.volume, &self.path)
    }
}

impl std::fmt::Display for EntryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.volume, self.path)
    }
}

/// Stat metadata with second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct Metadata {
    pub size: u64,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub atime: DateTime<Utc>,
}

impl Metadata {
    pub fn new(size: u64, ctime: i64, mtime: i64, atime: i64) -> Self {
        Self {
            size,
            ctime: from_unix_seconds(ctime),
            mtime: from_unix_seconds(mtime),
            atime: from_unix_seconds(atime),
        }
    }

    /// Build from filesystem metadata, truncating timestamps to whole seconds.
    pub fn from_fs(meta: &fs::Metadata) -> Self {
        let mtime = meta.modified().map(truncate).unwrap_or_default();
        let atime = meta.accessed().map(truncate).unwrap_or_default();
        Self {
            size: meta.len(),
            ctime: change_time(meta).unwrap_or(mtime),
            mtime,
            atime,
        }
    }
}

pub(crate) fn from_unix_seconds(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn truncate(time: std::time::SystemTime) -> DateTime<Utc> {
    from_unix_seconds(DateTime::<Utc>::from(time).timestamp())
}

#[cfg(unix)]
fn change_time(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    use std::os::unix::fs::MetadataExt;
    Some(from_unix_seconds(meta.ctime()))
}

#[cfg(not(unix))]
fn change_time(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    meta.created().ok().map(truncate)
}

/// A catalogued regular file.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileEntry {
    pub key: EntryKey,
    pub parent: String,
    pub meta: Metadata,
    /// Hex digest of the content; `None` until first hashed.
    pub content_hash: Option<String>,
    /// Set when size or mtime changed after the hash was computed.
    pub rehash_pending: bool,
}

impl FileEntry {
    pub fn new(key: EntryKey, meta: Metadata) -> Self {
        let parent = key.parent_path();
        Self {
            key,
            parent,
            meta,
            content_hash: None,
            rehash_pending: false,
        }
    }

    /// Whether the hash lifecycle should (re)compute this file's digest.
    pub fn needs_hash(&self) -> bool {
        self.content_hash.is_none() || self.rehash_pending
    }
}

/// A catalogued directory.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DirEntry {
    pub key: EntryKey,
    pub parent: String,
    pub meta: Metadata,
    /// Direct child files whose content is duplicated elsewhere.
    pub duplicate_count: Option<u32>,
}

impl DirEntry {
    pub fn new(key: EntryKey, meta: Metadata) -> Self {
        let parent = key.parent_path();
        Self {
            key,
            parent,
            meta,
            duplicate_count: None,
        }
    }
}

/// Either kind of catalog entry, tagged by the table it belongs to.
#[derive(Debug, Clone, serde::Serialize)]
pub enum Entry {
    File(FileEntry),
    Directory(DirEntry),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::File(_) => EntryKind::File,
            Entry::Directory(_) => EntryKind::Directory,
        }
    }

    pub fn key(&self) -> &EntryKey {
        match self {
            Entry::File(file) => &file.key,
            Entry::Directory(dir) => &dir.key,
        }
    }

    /// Build an entry of `kind` with parent derived from the key.
    pub fn new(kind: EntryKind, key: EntryKey, meta: Metadata) -> Self {
        match kind {
            EntryKind::File => Entry::File(FileEntry::new(key, meta)),
            EntryKind::Directory => Entry::Directory(DirEntry::new(key, meta)),
        }
    }
}

impl From<FileEntry> for Entry {
    fn from(file: FileEntry) -> Self {
        Entry::File(file)
    }
}

impl From<DirEntry> for Entry {
    fn from(dir: DirEntry) -> Self {
        Entry::Directory(dir)
    }
}

/// Common view over both entry kinds used by the reconciler.
pub trait CatalogEntry {
    const KIND: EntryKind;

    fn key(&self) -> &EntryKey;
    fn parent(&self) -> &str;
    fn meta(&self) -> &Metadata;
}

impl CatalogEntry for FileEntry {
    const KIND: EntryKind = EntryKind::File;

    fn key(&self) -> &EntryKey {
        &self.key
    }
    fn parent(&self) -> &str {
        &self.parent
    }
    fn meta(&self) -> &Metadata {
        &self.meta
    }
}

impl CatalogEntry for DirEntry {
    const KIND: EntryKind = EntryKind::Directory;

    fn key(&self) -> &EntryKey {
        &self.key
    }
    fn parent(&self) -> &str {
        &self.parent
    }
    fn meta(&self) -> &Metadata {
        &self.meta
    }
}
