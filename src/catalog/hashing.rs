//! Hash lifecycle.
//!
//! Selects files whose digest is missing or stale, hashes them against the
//! live filesystem and writes results back in time-bounded batches. Files
//! that vanished since they were catalogued are removed along the way, and
//! duplicate counts are refreshed once the queue is drained.

use rusqlite::params;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::entry::{EntryKey, EntryKind, FileEntry, Metadata};
use super::error::{CatalogError, Result};
use super::store::{file_from_row, size_to_sql, Catalog, FILE_COLUMNS};

/// Default number of files fetched per selection.
pub const DEFAULT_SELECT_LIMIT: usize = 100;
/// Default elapsed time after which pending results are flushed.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(6);
/// Default number of pending results that forces a flush.
pub const DEFAULT_FLUSH_MAX_ITEMS: usize = 1000;

/// Computes the content digest of a file.
pub trait ContentDigest {
    /// Hex digest of the file's bytes.
    fn digest_file(&self, path: &Path) -> Result<String>;
}

/// SHA-256 over the whole file, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digest;

impl ContentDigest for Sha256Digest {
    fn digest_file(&self, path: &Path) -> Result<String> {
        let digest_error = |source| CatalogError::Digest {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).map_err(digest_error)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let bytes_read = file.read(&mut buffer).map_err(digest_error)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

/// Accumulates items and reports when they should be persisted: after
/// `max_items` items or once `max_age` has elapsed since the last flush.
#[derive(Debug)]
pub struct FlushBatcher<T> {
    pending: Vec<T>,
    max_items: usize,
    max_age: Duration,
    last_flush: Instant,
}

impl<T> FlushBatcher<T> {
    /// `max_items == 0` disables the count threshold.
    pub fn new(max_items: usize, max_age: Duration) -> Self {
        Self {
            pending: Vec::new(),
            max_items,
            max_age,
            last_flush: Instant::now(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.pending.push(item);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a threshold has been crossed since the last flush.
    pub fn should_flush(&self) -> bool {
        let count_hit = self.max_items > 0 && self.pending.len() >= self.max_items;
        count_hit || self.last_flush.elapsed() >= self.max_age
    }

    /// Take the pending items and restart the clock.
    pub fn take(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.pending)
    }
}

/// Position in the (size, volume, path) ordering of the modified queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectCursor {
    pub size: u64,
    pub key: EntryKey,
}

impl SelectCursor {
    pub fn after(file: &FileEntry) -> Self {
        Self {
            size: file.meta.size,
            key: file.key.clone(),
        }
    }
}

impl Catalog {
    /// Files with no hash or a stale one, smallest first, at most `limit`.
    pub fn select_modified(&self, limit: usize) -> Result<Vec<FileEntry>> {
        self.select_modified_after(None, limit)
    }

    /// Like [`Catalog::select_modified`] but starting strictly after `cursor`.
    pub fn select_modified_after(&self, cursor: Option<&SelectCursor>, limit: usize) -> Result<Vec<FileEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let files = match cursor {
            None => {
                let sql = format!(
                    "SELECT {FILE_COLUMNS} FROM files \
                     WHERE content_hash IS NULL OR rehash_pending = 1 \
                     ORDER BY size ASC, volume ASC, path ASC LIMIT ?1"
                );
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![limit], file_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(cursor) => {
                let sql = format!(
                    "SELECT {FILE_COLUMNS} FROM files \
                     WHERE (content_hash IS NULL OR rehash_pending = 1) \
                     AND (size, volume, path) > (?1, ?2, ?3) \
                     ORDER BY size ASC, volume ASC, path ASC LIMIT ?4"
                );
                let mut stmt = self.conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(
                    params![size_to_sql(cursor.size), cursor.key.volume, cursor.key.path, limit],
                    file_from_row,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(files)
    }

    /// Persist hashing results in one transaction.
    ///
    /// Only rows that still exist are updated; a file deleted concurrently is
    /// not brought back. Returns the number of rows written.
    pub fn write_hashed(&mut self, files: &[FileEntry]) -> Result<usize> {
        if files.is_empty() {
            return Ok(0);
        }
        self.with_immediate_tx(|tx| {
            let mut update = tx.prepare_cached(
                "UPDATE files SET parent = ?3, size = ?4, ctime = ?5, mtime = ?6, atime = ?7, \
                 content_hash = ?8, rehash_pending = ?9 \
                 WHERE volume = ?1 AND path = ?2",
            )?;
            let mut written = 0;
            for file in files {
                written += update.execute(params![
                    file.key.volume,
                    file.key.path,
                    file.parent,
                    size_to_sql(file.meta.size),
                    file.meta.ctime.timestamp(),
                    file.meta.mtime.timestamp(),
                    file.meta.atime.timestamp(),
                    file.content_hash,
                    file.rehash_pending,
                ])?;
            }
            Ok(written)
        })
    }
}

/// Counters reported while and after hashing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HashStats {
    /// Files whose digest was computed.
    pub hashed: usize,
    /// Files whose digest could not be computed this run.
    pub failed: usize,
    /// Files that vanished from disk and were removed from the catalog.
    pub skipped: usize,
    /// Results persisted to the catalog.
    pub saved: usize,
    pub bytes_hashed: u64,
    /// Directories whose duplicate count changed.
    pub dirs_recounted: u64,
    /// Whether the run stopped on request before draining the queue.
    pub interrupted: bool,
}

/// Type alias for progress callback function
pub type ProgressCallback = Box<dyn Fn(&HashStats) + Send + Sync>;

/// Driver for the hash loop.
pub struct HashJob<D: ContentDigest = Sha256Digest> {
    digest: D,
    limit: usize,
    flush_interval: Duration,
    flush_max_items: usize,
    progress_callback: Option<ProgressCallback>,
    stop: Option<Arc<AtomicBool>>,
}

impl HashJob<Sha256Digest> {
    pub fn new() -> Self {
        Self::with_digest(Sha256Digest)
    }
}

impl Default for HashJob<Sha256Digest> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: ContentDigest> HashJob<D> {
    /// Create a job that hashes with a custom digest.
    pub fn with_digest(digest: D) -> Self {
        Self {
            digest,
            limit: DEFAULT_SELECT_LIMIT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_max_items: DEFAULT_FLUSH_MAX_ITEMS,
            progress_callback: None,
            stop: None,
        }
    }

    /// Files fetched per selection.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Pending results that force a flush; zero means time-only flushing.
    pub fn with_flush_max_items(mut self, max_items: usize) -> Self {
        self.flush_max_items = max_items;
        self
    }

    /// Set a progress callback invoked after every file and flush.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&HashStats) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Flag checked between batches; setting it ends the run early.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn report(&self, stats: &HashStats) {
        if let Some(ref callback) = self.progress_callback {
            callback(stats);
        }
    }

    /// Hash everything that needs it, then refresh duplicate counts.
    ///
    /// The queue is walked in (size, volume, path) order; a file whose digest
    /// fails stays eligible and is retried by the next run.
    pub fn run(&self, catalog: &mut Catalog) -> Result<HashStats> {
        let mut stats = HashStats::default();
        let mut batch = FlushBatcher::new(self.flush_max_items, self.flush_interval);
        let mut cursor: Option<SelectCursor> = None;
        let mut failed_keys: HashSet<EntryKey> = HashSet::new();

        info!(limit = self.limit, "hashing modified files");
        'select: loop {
            if self.stop_requested() {
                stats.interrupted = true;
                break;
            }

            let selected = catalog.select_modified_after(cursor.as_ref(), self.limit)?;
            let Some(last) = selected.last() else {
                break;
            };
            cursor = Some(SelectCursor::after(last));
            debug!(selected = selected.len(), "selected files to hash");

            for file in selected {
                if failed_keys.contains(&file.key) {
                    continue;
                }
                let key = file.key.clone();
                match self.process(file) {
                    Ok(hashed) => {
                        if hashed.content_hash.is_some() {
                            stats.hashed += 1;
                            stats.bytes_hashed += hashed.meta.size;
                        } else {
                            stats.failed += 1;
                            failed_keys.insert(key);
                        }
                        batch.push(hashed);
                    }
                    Err(CatalogError::NotFoundOnDisk { path }) => {
                        debug!(path = %path.display(), "vanished before hashing");
                        catalog.delete_entry(EntryKind::File, &key)?;
                        stats.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }

                if batch.should_flush() {
                    stats.saved += self.flush(catalog, &mut batch)?;
                    if self.stop_requested() {
                        stats.interrupted = true;
                        break 'select;
                    }
                }
                self.report(&stats);
            }
        }

        stats.saved += self.flush(catalog, &mut batch)?;
        self.report(&stats);

        stats.dirs_recounted = catalog.recompute_duplicate_counts()?;
        info!(
            hashed = stats.hashed,
            failed = stats.failed,
            skipped = stats.skipped,
            saved = stats.saved,
            "hashing finished"
        );
        Ok(stats)
    }

    /// Refresh and hash one file.
    ///
    /// A file missing on disk is removed from the catalog and reported as
    /// `NotFoundOnDisk`; an unreadable one comes back without a hash.
    fn process(&self, mut file: FileEntry) -> Result<FileEntry> {
        let full_path = file.key.full_path();
        match std::fs::symlink_metadata(&full_path) {
            Ok(meta) if meta.is_file() => {
                file.meta = Metadata::from_fs(&meta);
            }
            Ok(_) => {
                return Err(CatalogError::NotFoundOnDisk { path: full_path });
            }
            Err(e) => match CatalogError::from_io_error(e, "reading metadata of", full_path.clone()) {
                err @ CatalogError::NotFoundOnDisk { .. } => return Err(err),
                other => warn!(key = %file.key, error = %other, "keeping catalogued metadata"),
            },
        }
        file.parent = file.key.parent_path();

        match self.digest.digest_file(&full_path) {
            Ok(digest) => {
                file.content_hash = Some(digest);
                file.rehash_pending = false;
            }
            Err(e) => {
                warn!(key = %file.key, error = %e, "digest failed, will retry next run");
                file.content_hash = None;
            }
        }
        Ok(file)
    }

    fn flush(&self, catalog: &mut Catalog, batch: &mut FlushBatcher<FileEntry>) -> Result<usize> {
        if batch.is_empty() {
            batch.take();
            return Ok(0);
        }
        let files = batch.take();
        let written = catalog.write_hashed(&files)?;
        debug!(pending = files.len(), written, "flushed hash batch");
        Ok(files.len())
    }
}
