// Catalog store
// One SQLite connection per driver; every write runs in its own immediate transaction

use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::entry::{from_unix_seconds, DirEntry, Entry, EntryKey, EntryKind, FileEntry, Metadata};
use super::error::{CatalogError, Result};
use super::schema;

pub(crate) const FILE_COLUMNS: &str =
    "volume, path, parent, size, ctime, mtime, atime, content_hash, rehash_pending";
pub(crate) const DIR_COLUMNS: &str = "volume, path, parent, size, ctime, mtime, atime, dup_count";

/// Insert a file, or refresh its metadata and flag a rehash when size or
/// mtime moved. The stored hash is never touched here.
pub(crate) const UPSERT_FILE: &str = "
    INSERT INTO files (volume, path, parent, size, ctime, mtime, atime, content_hash, rehash_pending)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, 0)
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

pub(crate) const UPSERT_DIR: &str = "
    INSERT INTO dirs (volume, path, parent, size, ctime, mtime, atime, dup_count)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL)
    ON CONFLICT (volume, path) DO UPDATE SET
        parent = excluded.parent,
        size = excluded.size,
        ctime = excluded.ctime,
        mtime = excluded.mtime,
        atime = excluded.atime";

/// Persisted catalog of files and directories across volumes.
pub struct Catalog {
    pub(crate) conn: Connection,
    location: Option<PathBuf>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("location", &self.location)
            .finish()
    }
}

impl Catalog {
    /// Open (creating if needed) the catalog database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| CatalogError::Io {
                path: dir.to_path_buf(),
                operation: "creating catalog directory",
                source: e,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let mut catalog = Self::from_connection(conn)?;
        catalog.location = Some(path.to_path_buf());
        debug!(path = %path.display(), "catalog opened");
        Ok(catalog)
    }

    /// Open a private in-memory catalog.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(10))?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn,
            location: None,
        })
    }

    /// Database file backing this catalog, if any.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Run `f` in an immediate transaction; any error rolls everything back.
    pub(crate) fn with_immediate_tx<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(schema::table_names(&self.conn)?)
    }

    pub fn get_file(&self, key: &EntryKey) -> Result<Option<FileEntry>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE volume = ?1 AND path = ?2");
        let file = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params![key.volume, key.path], file_from_row)
            .optional()?;
        Ok(file)
    }

    pub fn get_dir(&self, key: &EntryKey) -> Result<Option<DirEntry>> {
        let sql = format!("SELECT {DIR_COLUMNS} FROM dirs WHERE volume = ?1 AND path = ?2");
        let dir = self
            .conn
            .prepare_cached(&sql)?
            .query_row(params![key.volume, key.path], dir_from_row)
            .optional()?;
        Ok(dir)
    }

    /// Look up an entry of a known kind.
    pub fn get(&self, kind: EntryKind, key: &EntryKey) -> Result<Option<Entry>> {
        Ok(match kind {
            EntryKind::File => self.get_file(key)?.map(Entry::File),
            EntryKind::Directory => self.get_dir(key)?.map(Entry::Directory),
        })
    }

    /// Every file in a volume, ordered by path.
    pub fn files_in_volume(&self, volume: &str) -> Result<Vec<FileEntry>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE volume = ?1 ORDER BY path");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let files = stmt
            .query_map(params![volume], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Every directory in a volume, ordered by path.
    pub fn dirs_in_volume(&self, volume: &str) -> Result<Vec<DirEntry>> {
        let sql = format!("SELECT {DIR_COLUMNS} FROM dirs WHERE volume = ?1 ORDER BY path");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let dirs = stmt
            .query_map(params![volume], dir_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dirs)
    }

    pub fn count(&self, kind: EntryKind) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Insert or refresh a single entry in its own transaction.
    pub fn upsert_entry(&mut self, entry: &Entry) -> Result<()> {
        self.with_immediate_tx(|tx| upsert_entry_tx(tx, entry))
    }

    /// Remove an entry; directories take their catalogued descendants with
    /// them. Deleting an unknown key is a no-op and returns `false`.
    pub fn delete_entry(&mut self, kind: EntryKind, key: &EntryKey) -> Result<bool> {
        self.with_immediate_tx(|tx| delete_entry_tx(tx, kind, key))
    }
}

pub(crate) fn upsert_entry_tx(tx: &Transaction<'_>, entry: &Entry) -> Result<()> {
    let (sql, key, parent, meta) = match entry {
        Entry::File(file) => (UPSERT_FILE, &file.key, &file.parent, &file.meta),
        Entry::Directory(dir) => (UPSERT_DIR, &dir.key, &dir.parent, &dir.meta),
    };
    tx.prepare_cached(sql)?.execute(params![
        key.volume,
        key.path,
        parent,
        size_to_sql(meta.size),
        meta.ctime.timestamp(),
        meta.mtime.timestamp(),
        meta.atime.timestamp(),
    ])?;
    Ok(())
}

pub(crate) fn delete_entry_tx(tx: &Transaction<'_>, kind: EntryKind, key: &EntryKey) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE volume = ?1 AND path = ?2", kind.table());
    let removed = tx.prepare_cached(&sql)?.execute(params![key.volume, key.path])?;

    if kind == EntryKind::Directory && !key.path.is_empty() {
        let prefix = descendant_prefix(&key.path);
        let mut below = 0;
        for table in ["files", "dirs"] {
            let sql = format!(
                "DELETE FROM {table} WHERE volume = ?1 AND substr(path, 1, length(?2)) = ?2"
            );
            below += tx.prepare_cached(&sql)?.execute(params![key.volume, prefix])?;
        }
        if below > 0 {
            debug!(key = %key, descendants = below, "removed directory contents");
        }
    }
    Ok(removed > 0)
}

/// Path prefix shared by every descendant of `path`.
pub(crate) fn descendant_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

pub(crate) fn size_to_sql(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<Metadata> {
    let size: Option<i64> = row.get(3)?;
    let ctime: Option<i64> = row.get(4)?;
    let mtime: Option<i64> = row.get(5)?;
    let atime: Option<i64> = row.get(6)?;
    Ok(Metadata {
        size: size.unwrap_or(0).max(0) as u64,
        ctime: from_unix_seconds(ctime.unwrap_or(0)),
        mtime: from_unix_seconds(mtime.unwrap_or(0)),
        atime: from_unix_seconds(atime.unwrap_or(0)),
    })
}

/// Decode a row selected with [`FILE_COLUMNS`].
pub(crate) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileEntry> {
    let rehash: Option<bool> = row.get(8)?;
    Ok(FileEntry {
        key: EntryKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        parent: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        meta: metadata_from_row(row)?,
        content_hash: row.get(7)?,
        rehash_pending: rehash.unwrap_or(false),
    })
}

/// Decode a row selected with [`DIR_COLUMNS`].
pub(crate) fn dir_from_row(row: &Row<'_>) -> rusqlite::Result<DirEntry> {
    let count: Option<i64> = row.get(7)?;
    Ok(DirEntry {
        key: EntryKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        parent: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        meta: metadata_from_row(row)?,
        duplicate_count: count.map(|c| c.max(0) as u32),
    })
}
