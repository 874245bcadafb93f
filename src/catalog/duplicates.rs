// Duplicate accounting
// Recounts, for every directory, the direct child files whose content is shared elsewhere

use std::time::Instant;
use tracing::{debug, info};

use super::error::Result;
use super::store::Catalog;

// Hashes held by two or more non-empty files anywhere in the catalog. Only
// directories whose count actually changes are written; a directory without
// files is counted as zero.
const RECOUNT: &str = "
    WITH dup_hashes (content_hash) AS (
        SELECT content_hash FROM files
        WHERE content_hash IS NOT NULL AND size > 0
        GROUP BY content_hash
        HAVING COUNT(*) > 1
    ),
    counts (volume, path, n) AS (
        SELECT d.volume, d.path, COUNT(m.content_hash)
        FROM dirs d
        LEFT JOIN files f ON f.volume = d.volume AND f.parent = d.path AND f.size > 0
        LEFT JOIN dup_hashes m ON m.content_hash = f.content_hash
        GROUP BY d.volume, d.path
    )
    UPDATE dirs SET dup_count = counts.n
    FROM counts
    WHERE dirs.volume = counts.volume
      AND dirs.path = counts.path
      AND (dirs.dup_count IS NULL OR dirs.dup_count <> counts.n)";

impl Catalog {
    /// Refresh `duplicate_count` on every directory in one aggregate pass.
    ///
    /// Returns the number of directories whose count changed.
    pub fn recompute_duplicate_counts(&mut self) -> Result<u64> {
        let start = Instant::now();
        let changed = self.with_immediate_tx(|tx| Ok(tx.execute(RECOUNT, [])?))?;
        debug!(elapsed = ?start.elapsed(), "duplicate recount");
        info!(dirs = changed, "duplicate counts updated");
        Ok(changed as u64)
    }

    /// Number of non-empty files sharing content with at least one other file.
    pub fn duplicate_file_count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM files WHERE size > 0 AND content_hash IN (
                 SELECT content_hash FROM files
                 WHERE content_hash IS NOT NULL AND size > 0
                 GROUP BY content_hash HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
