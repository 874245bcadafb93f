// Bulk reconciliation of a full scan against the catalog
// Stage, upsert and prune run in one transaction per entry kind

use rusqlite::{params, Transaction};
use std::time::Instant;
use tracing::{debug, info};

use super::entry::{CatalogEntry, DirEntry, Entry, EntryKind, FileEntry};
use super::error::{CatalogError, Result};
use super::schema;
use super::store::{size_to_sql, Catalog};

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileReport {
    /// Distinct keys in the staging set.
    pub staged: u64,
    /// Keys that were new to the catalog.
    pub inserted: u64,
    /// Existing keys whose size or mtime changed.
    pub updated: u64,
    /// Files newly marked for rehashing (always zero for directories).
    pub rehash_flagged: u64,
    /// Catalog rows removed because the scan no longer contains them.
    pub deleted: u64,
}

const STAGE_ROW: &str = "
    INSERT OR REPLACE INTO staged_entries (volume, path, parent, size, ctime, mtime, atime)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

// `WHERE true` keeps SQLite from parsing ON CONFLICT as a join constraint.
const APPLY_FILES: &str = "
    INSERT INTO files (volume, path, parent, size, ctime, mtime, atime, content_hash, rehash_pending)
    SELECT volume, path, parent, size, ctime, mtime, atime, NULL, 0 FROM staged_entries WHERE true
    ON CONFLICT (volume, path) DO UPDATE SET
        parent = excluded.parent,
        size = excluded.size,
        ctime = excluded.ctime,
        mtime = excluded.mtime,
        atime = excluded.atime,
        rehash_pending = CASE
            WHEN files.size IS NOT excluded.size OR files.mtime IS NOT excluded.mtime THEN 1
            ELSE files.rehash_pending
        END";

const APPLY_DIRS: &str = "
    INSERT INTO dirs (volume, path, parent, size, ctime, mtime, atime, dup_count)
    SELECT volume, path, parent, size, ctime, mtime, atime, NULL FROM staged_entries WHERE true
    ON CONFLICT (volume, path) DO UPDATE SET
        parent = excluded.parent,
        size = excluded.size,
        ctime = excluded.ctime,
        mtime = excluded.mtime,
        atime = excluded.atime";

impl Catalog {
    /// Make the catalog match `scanned` for every volume it mentions.
    ///
    /// Entries are upserted, files whose size or mtime moved are flagged for
    /// rehashing, and rows of the scanned volumes that are missing from the
    /// listing are deleted. Volumes absent from `scanned` are untouched, and
    /// an empty listing changes nothing.
    pub fn reconcile<E: CatalogEntry>(&mut self, scanned: &[E]) -> Result<ReconcileReport> {
        let kind = E::KIND;
        if scanned.is_empty() {
            debug!(table = kind.table(), "empty scan, nothing to reconcile");
            return Ok(ReconcileReport::default());
        }

        info!(table = kind.table(), entries = scanned.len(), "reconciling catalog");
        let report = self.with_immediate_tx(|tx| {
            let start = Instant::now();
            stage(tx, scanned)?;
            debug!(elapsed = ?start.elapsed(), "staged");

            let mut report = measure(tx, kind)?;

            let start = Instant::now();
            let apply = match kind {
                EntryKind::File => APPLY_FILES,
                EntryKind::Directory => APPLY_DIRS,
            };
            tx.execute(apply, [])?;
            debug!(elapsed = ?start.elapsed(), "upserted");

            let start = Instant::now();
            report.deleted = prune(tx, kind)?;
            debug!(elapsed = ?start.elapsed(), "pruned");

            tx.execute("DELETE FROM staged_entries", [])?;
            Ok(report)
        })?;

        info!(
            table = kind.table(),
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "reconcile committed"
        );
        Ok(report)
    }

    /// Reconcile a listing of tagged entries that must all be of `kind`.
    pub fn reconcile_entries(&mut self, kind: EntryKind, scanned: &[Entry]) -> Result<ReconcileReport> {
        match kind {
            EntryKind::File => {
                let files = scanned
                    .iter()
                    .map(|entry| match entry {
                        Entry::File(file) => Ok(file.clone()),
                        other => Err(mismatch(kind, other)),
                    })
                    .collect::<Result<Vec<FileEntry>>>()?;
                self.reconcile(&files)
            }
            EntryKind::Directory => {
                let dirs = scanned
                    .iter()
                    .map(|entry| match entry {
                        Entry::Directory(dir) => Ok(dir.clone()),
                        other => Err(mismatch(kind, other)),
                    })
                    .collect::<Result<Vec<DirEntry>>>()?;
                self.reconcile(&dirs)
            }
        }
    }
}

fn mismatch(expected: EntryKind, found: &Entry) -> CatalogError {
    CatalogError::KindMismatch {
        expected,
        found: found.kind(),
    }
}

fn stage<E: CatalogEntry>(tx: &Transaction<'_>, scanned: &[E]) -> Result<()> {
    tx.execute_batch(schema::STAGING)?;
    tx.execute("DELETE FROM staged_entries", [])?;

    let mut insert = tx.prepare_cached(STAGE_ROW)?;
    for entry in scanned {
        let key = entry.key();
        let meta = entry.meta();
        insert.execute(params![
            key.volume,
            key.path,
            entry.parent(),
            size_to_sql(meta.size),
            meta.ctime.timestamp(),
            meta.mtime.timestamp(),
            meta.atime.timestamp(),
        ])?;
    }
    Ok(())
}

/// Count what the upsert is about to do, before it does it.
fn measure(tx: &Transaction<'_>, kind: EntryKind) -> Result<ReconcileReport> {
    let table = kind.table();
    let staged: i64 = tx.query_row("SELECT COUNT(*) FROM staged_entries", [], |row| row.get(0))?;
    let inserted: i64 = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM staged_entries s WHERE NOT EXISTS \
             (SELECT 1 FROM {table} t WHERE t.volume = s.volume AND t.path = s.path)"
        ),
        [],
        |row| row.get(0),
    )?;
    let updated: i64 = tx.query_row(
        &format!(
            "SELECT COUNT(*) FROM staged_entries s JOIN {table} t \
             ON t.volume = s.volume AND t.path = s.path \
             WHERE t.size IS NOT s.size OR t.mtime IS NOT s.mtime"
        ),
        [],
        |row| row.get(0),
    )?;
    let rehash_flagged: i64 = match kind {
        EntryKind::File => tx.query_row(
            "SELECT COUNT(*) FROM staged_entries s JOIN files t \
             ON t.volume = s.volume AND t.path = s.path \
             WHERE (t.size IS NOT s.size OR t.mtime IS NOT s.mtime) \
             AND coalesce(t.rehash_pending, 0) = 0",
            [],
            |row| row.get(0),
        )?,
        EntryKind::Directory => 0,
    };

    Ok(ReconcileReport {
        staged: staged as u64,
        inserted: inserted as u64,
        updated: updated as u64,
        rehash_flagged: rehash_flagged as u64,
        deleted: 0,
    })
}

/// Delete rows of the staged volumes that the staging set does not contain.
fn prune(tx: &Transaction<'_>, kind: EntryKind) -> Result<u64> {
    let table = kind.table();
    let deleted = tx.execute(
        &format!(
            "DELETE FROM {table} \
             WHERE volume IN (SELECT DISTINCT volume FROM staged_entries) \
             AND NOT EXISTS (SELECT 1 FROM staged_entries s \
                             WHERE s.volume = {table}.volume AND s.path = {table}.path)"
        ),
        [],
    )?;
    Ok(deleted as u64)
}
