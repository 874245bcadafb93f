// Volume scanning
// Walks every volume with jwalk and produces the full listing the reconciler consumes

use anyhow::{bail, Result};
use jwalk::WalkDir;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::catalog::{DirEntry, EntryKey, FileEntry, Metadata};
use crate::exclude::ExcludePatterns;
use crate::paths;

/// Statistics collected during a scan
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScanStats {
    pub volumes_scanned: usize,
    pub volumes_missing: usize,
    pub files: usize,
    pub dirs: usize,
    pub total_bytes: u64,
    pub errors: usize,
    /// Volumes whose walk hit errors; their entries are withheld from the listing
    pub incomplete_volumes: Vec<String>,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
}

// Helper function to serialize Duration as seconds
fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Everything found under the scanned volumes
#[derive(Debug, Clone, Default)]
pub struct ScanListing {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirEntry>,
}

impl ScanListing {
    /// Drop every entry belonging to one of `volumes`. Returns how many
    /// entries were removed.
    pub fn without_volumes(&mut self, volumes: &[String]) -> usize {
        let before = self.files.len() + self.dirs.len();
        self.files.retain(|f| !volumes.contains(&f.key.volume));
        self.dirs.retain(|d| !volumes.contains(&d.key.volume));
        before - self.files.len() - self.dirs.len()
    }
}

/// Filesystem scanner producing catalog listings
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    denylist: Vec<String>,
    exclude: ExcludePatterns,
}

impl Scanner {
    /// Create a scanner with the default exclusions and no denylist
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip top-level entries whose name starts with any of these prefixes
    pub fn with_denylist(mut self, denylist: Vec<String>) -> Self {
        self.denylist = denylist.into_iter().filter(|p| !p.is_empty()).collect();
        self
    }

    pub fn with_exclude(mut self, exclude: ExcludePatterns) -> Self {
        self.exclude = exclude;
        self
    }

    /// Whether a top-level name is denylisted
    pub fn is_denied(&self, top_level: &str) -> bool {
        is_denied(&self.denylist, top_level)
    }

    /// Scan every volume. A missing volume is reported and skipped so that
    /// its catalogued rows are left alone rather than pruned. The same goes
    /// for a volume whose walk hit errors, since its listing is partial.
    pub fn scan(&self, volumes: &[PathBuf]) -> (ScanListing, ScanStats) {
        let start_time = Instant::now();
        let mut listing = ScanListing::default();
        let mut stats = ScanStats::default();

        for root in volumes {
            match self.scan_volume(root, &mut listing, &mut stats) {
                Ok(()) => stats.volumes_scanned += 1,
                Err(e) => {
                    warn!(volume = %root.display(), error = %e, "volume skipped");
                    stats.volumes_missing += 1;
                }
            }
        }

        if !stats.incomplete_volumes.is_empty() {
            let withheld = listing.without_volumes(&stats.incomplete_volumes);
            stats.total_bytes = listing.files.iter().map(|f| f.meta.size).sum();
            warn!(
                volumes = ?stats.incomplete_volumes,
                withheld,
                "incomplete volumes left out of the listing"
            );
        }

        stats.files = listing.files.len();
        stats.dirs = listing.dirs.len();
        stats.duration = start_time.elapsed();
        info!(
            files = stats.files,
            dirs = stats.dirs,
            errors = stats.errors,
            "scan complete"
        );
        (listing, stats)
    }

    /// Walk one volume root and append its entries to `listing`
    pub fn scan_volume(&self, root: &Path, listing: &mut ScanListing, stats: &mut ScanStats) -> Result<()> {
        if !root.is_dir() {
            bail!("volume root {} is not a directory", root.display());
        }
        let volume = paths::volume_label(root);
        info!(volume = %volume, "scanning volume");

        let denylist = self.denylist.clone();
        let exclude = self.exclude.clone();
        let walker = WalkDir::new(root)
            .parallelism(jwalk::Parallelism::RayonNewPool(0))
            .skip_hidden(false)
            .follow_links(false)
            .process_read_dir(move |_depth, _path, _state, children| {
                // Pruned here so denylisted and excluded trees are never read
                children.retain(|entry_result| match entry_result {
                    Ok(entry) => {
                        let name = entry.file_name.to_string_lossy();
                        if entry.depth == 1 && is_denied(&denylist, &name) {
                            return false;
                        }
                        !exclude.is_excluded(&name)
                    }
                    Err(_) => true,
                });
            });

        let files_before = listing.files.len();
        let dirs_before = listing.dirs.len();
        let errors_before = stats.errors;
        for entry_result in walker {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    // Log errors during directory scans without stopping
                    warn!(error = %e, "error walking volume");
                    stats.errors += 1;
                    continue;
                }
            };
            if entry.depth == 0 {
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_symlink() || !(file_type.is_file() || file_type.is_dir()) {
                continue;
            }

            let path = entry.path();
            let Some(relative) = paths::relative_to_root(&path, root) else {
                continue;
            };
            let meta = match entry.metadata() {
                Ok(meta) => Metadata::from_fs(&meta),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot read metadata");
                    stats.errors += 1;
                    continue;
                }
            };

            let key = EntryKey::new(volume.clone(), relative);
            if file_type.is_dir() {
                listing.dirs.push(DirEntry::new(key, meta));
            } else {
                stats.total_bytes += meta.size;
                listing.files.push(FileEntry::new(key, meta));
            }
        }

        if stats.errors > errors_before {
            stats.incomplete_volumes.push(volume.clone());
        }
        debug!(
            volume = %volume,
            files = listing.files.len() - files_before,
            dirs = listing.dirs.len() - dirs_before,
            "volume walked"
        );
        Ok(())
    }
}

fn is_denied(denylist: &[String], top_level: &str) -> bool {
    denylist
        .iter()
        .any(|prefix| !prefix.is_empty() && top_level.starts_with(prefix.as_str()))
}
