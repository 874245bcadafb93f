//! Live change ingestion.
//!
//! Applies one filesystem change at a time, each in its own transaction, so a
//! failing event never affects the ones before or after it.

use rusqlite::params;
use tracing::{debug, trace};

use super::entry::{Entry, EntryKey, EntryKind};
use super::error::Result;
use super::store::{delete_entry_tx, descendant_prefix, upsert_entry_tx, Catalog};
use crate::exclude::ExcludePatterns;

/// A single change reported by a filesystem watch source.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// An entry appeared; carries freshly read metadata.
    Created(Entry),
    Deleted { kind: EntryKind, key: EntryKey },
    /// Content or metadata changed in place.
    Modified { kind: EntryKind, key: EntryKey },
    /// An entry changed location without changing content.
    Moved {
        kind: EntryKind,
        from: EntryKey,
        to: EntryKey,
        to_parent: String,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> EntryKind {
        match self {
            ChangeEvent::Created(entry) => entry.kind(),
            ChangeEvent::Deleted { kind, .. }
            | ChangeEvent::Modified { kind, .. }
            | ChangeEvent::Moved { kind, .. } => *kind,
        }
    }

    /// Key the event is about (the source key for moves).
    pub fn key(&self) -> &EntryKey {
        match self {
            ChangeEvent::Created(entry) => entry.key(),
            ChangeEvent::Deleted { key, .. } | ChangeEvent::Modified { key, .. } => key,
            ChangeEvent::Moved { from, .. } => from,
        }
    }
}

/// What applying an event did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The catalog was changed.
    Applied,
    /// The event was valid but had nothing to change.
    Unchanged,
    /// The path matched an exclusion pattern and was dropped.
    Excluded,
}

impl Catalog {
    /// Flag a file's hash as stale. Returns `false` for unknown keys.
    pub fn mark_rehash(&mut self, key: &EntryKey) -> Result<bool> {
        self.with_immediate_tx(|tx| {
            let updated = tx
                .prepare_cached("UPDATE files SET rehash_pending = 1 WHERE volume = ?1 AND path = ?2")?
                .execute(params![key.volume, key.path])?;
            Ok(updated > 0)
        })
    }

    /// Rewrite an entry's key and parent in place, keeping hash state.
    ///
    /// A row already sitting on the destination key is replaced. Moving a
    /// directory carries every catalogued descendant along with it. Returns
    /// `false` when the source key is unknown.
    pub fn move_entry(
        &mut self,
        kind: EntryKind,
        from: &EntryKey,
        to: &EntryKey,
        to_parent: &str,
    ) -> Result<bool> {
        if from == to {
            return Ok(false);
        }
        self.with_immediate_tx(|tx| {
            let table = kind.table();
            let exists: bool = tx
                .prepare_cached(&format!(
                    "SELECT EXISTS (SELECT 1 FROM {table} WHERE volume = ?1 AND path = ?2)"
                ))?
                .query_row(params![from.volume, from.path], |row| row.get(0))?;
            if !exists {
                return Ok(false);
            }

            delete_entry_tx(tx, kind, to)?;
            tx.prepare_cached(&format!(
                "UPDATE {table} SET volume = ?3, path = ?4, parent = ?5 WHERE volume = ?1 AND path = ?2"
            ))?
            .execute(params![from.volume, from.path, to.volume, to.path, to_parent])?;

            if kind == EntryKind::Directory && !from.path.is_empty() {
                let moved = move_descendants(tx, from, to)?;
                if moved > 0 {
                    debug!(from = %from, to = %to, descendants = moved, "moved directory contents");
                }
            }
            Ok(true)
        })
    }
}

fn move_descendants(tx: &rusqlite::Transaction<'_>, from: &EntryKey, to: &EntryKey) -> Result<usize> {
    let old_prefix = descendant_prefix(&from.path);
    let new_prefix = descendant_prefix(&to.path);
    let mut moved = 0;
    for table in ["files", "dirs"] {
        // Parent is either the moved directory itself or another descendant.
        let sql = format!(
            "UPDATE {table} SET \
                 volume = ?3, \
                 path = ?4 || substr(path, length(?2) + 1), \
                 parent = CASE WHEN parent = ?5 THEN ?6 \
                               ELSE ?4 || substr(parent, length(?2) + 1) END \
             WHERE volume = ?1 AND substr(path, 1, length(?2)) = ?2"
        );
        moved += tx.prepare_cached(&sql)?.execute(params![
            from.volume,
            old_prefix,
            to.volume,
            new_prefix,
            from.path,
            to.path,
        ])?;
    }
    Ok(moved)
}

/// Applies watch events to the catalog after filtering excluded paths.
#[derive(Debug)]
pub struct EventIngest<'a> {
    catalog: &'a mut Catalog,
    exclude: ExcludePatterns,
}

impl<'a> EventIngest<'a> {
    pub fn new(catalog: &'a mut Catalog, exclude: ExcludePatterns) -> Self {
        Self { catalog, exclude }
    }

    fn is_excluded(&self, key: &EntryKey) -> bool {
        self.exclude.is_excluded(&key.path)
    }

    /// Dispatch one event.
    pub fn apply(&mut self, event: ChangeEvent) -> Result<IngestOutcome> {
        let excluded = match &event {
            ChangeEvent::Moved { from, to, .. } => self.is_excluded(from) || self.is_excluded(to),
            other => self.is_excluded(other.key()),
        };
        if excluded {
            trace!(key = %event.key(), "excluded change dropped");
            return Ok(IngestOutcome::Excluded);
        }

        match event {
            ChangeEvent::Created(entry) => self.record_created(&entry),
            ChangeEvent::Deleted { kind, key } => self.record_deleted(kind, &key),
            ChangeEvent::Modified { kind, key } => self.mark_modified(kind, &key),
            ChangeEvent::Moved {
                kind,
                from,
                to,
                to_parent,
            } => self.apply_move(kind, &from, &to, &to_parent),
        }
    }

    /// Insert or refresh an entry; repeated notifications are harmless.
    pub fn record_created(&mut self, entry: &Entry) -> Result<IngestOutcome> {
        debug!(key = %entry.key(), kind = ?entry.kind(), "created");
        self.catalog
            .with_immediate_tx(|tx| upsert_entry_tx(tx, entry))?;
        Ok(IngestOutcome::Applied)
    }

    /// Remove an entry; deleting something unknown is not an error.
    pub fn record_deleted(&mut self, kind: EntryKind, key: &EntryKey) -> Result<IngestOutcome> {
        debug!(key = %key, kind = ?kind, "deleted");
        Ok(outcome(self.catalog.delete_entry(kind, key)?))
    }

    /// Flag a file for rehashing. Directories carry no hash state, so a
    /// directory modification changes nothing.
    pub fn mark_modified(&mut self, kind: EntryKind, key: &EntryKey) -> Result<IngestOutcome> {
        match kind {
            EntryKind::File => {
                debug!(key = %key, "modified");
                Ok(outcome(self.catalog.mark_rehash(key)?))
            }
            EntryKind::Directory => Ok(IngestOutcome::Unchanged),
        }
    }

    /// Relocate an entry, preserving its hash and rehash flag.
    pub fn apply_move(
        &mut self,
        kind: EntryKind,
        from: &EntryKey,
        to: &EntryKey,
        to_parent: &str,
    ) -> Result<IngestOutcome> {
        debug!(from = %from, to = %to, kind = ?kind, "moved");
        Ok(outcome(self.catalog.move_entry(kind, from, to, to_parent)?))
    }
}

fn outcome(changed: bool) -> IngestOutcome {
    if changed {
        IngestOutcome::Applied
    } else {
        IngestOutcome::Unchanged
    }
}
