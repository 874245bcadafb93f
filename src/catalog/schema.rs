// Catalog schema
// Timestamps are Unix seconds; `hashes` and `master_dirs` are created but unused

use rusqlite::Connection;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dirs (
    volume TEXT NOT NULL,
    path TEXT NOT NULL,
    parent TEXT,
    size INTEGER,
    ctime INTEGER,
    mtime INTEGER,
    atime INTEGER,
    dup_count INTEGER,
    PRIMARY KEY (volume, path)
);
CREATE INDEX IF NOT EXISTS dirs_parent ON dirs (volume, parent);

CREATE TABLE IF NOT EXISTS files (
    volume TEXT NOT NULL,
    path TEXT NOT NULL,
    parent TEXT,
    size INTEGER,
    ctime INTEGER,
    mtime INTEGER,
    atime INTEGER,
    content_hash TEXT,
    rehash_pending INTEGER,
    PRIMARY KEY (volume, path)
);
CREATE INDEX IF NOT EXISTS files_parent ON files (volume, parent);
CREATE INDEX IF NOT EXISTS files_content_hash ON files (content_hash);
CREATE INDEX IF NOT EXISTS files_size ON files (size);

CREATE TABLE IF NOT EXISTS hashes (
    sha256 TEXT NOT NULL PRIMARY KEY,
    size INTEGER,
    count INTEGER
);

CREATE TABLE IF NOT EXISTS master_dirs (
    volume TEXT NOT NULL,
    path TEXT NOT NULL,
    PRIMARY KEY (volume, path)
);
"#;

/// Connection-local staging table for one reconcile pass.
pub(crate) const STAGING: &str = r#"
CREATE TEMP TABLE IF NOT EXISTS staged_entries (
    volume TEXT NOT NULL,
    path TEXT NOT NULL,
    parent TEXT,
    size INTEGER,
    ctime INTEGER,
    mtime INTEGER,
    atime INTEGER,
    PRIMARY KEY (volume, path)
);
"#;

pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Tables present in the main schema, for diagnostics.
pub(crate) fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}
