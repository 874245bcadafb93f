//! Exclude pattern matching for catalog entries.
//!
//! Vendor and system metadata directories (Synology `@eaDir`, recycle bins,
//! Finder droppings) never reach the catalog, whether they arrive from a full
//! scan or from a live change event.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

/// Default patterns excluded from the catalog.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    // NAS vendor metadata
    "@eaDir",
    "@tmp",
    "@sharebin",
    "#recycle",
    "#snapshot",
    ".@__thumb",
    // OS-specific
    ".DS_Store",
    ".AppleDouble",
    "Thumbs.db",
    "desktop.ini",
];

/// Pattern matching for catalog exclusion.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    glob_set: GlobSet,
    patterns: Vec<String>,
}

impl Default for ExcludePatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ExcludePatterns {
    /// Create an empty exclude set that matches nothing.
    pub fn new() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Create with the default exclude patterns.
    pub fn with_defaults() -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut patterns = Vec::new();

        for pattern in DEFAULT_EXCLUDES {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
                patterns.push(pattern.to_string());
            }
        }

        Self {
            glob_set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
            patterns,
        }
    }

    /// Create from a list of patterns.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut pattern_list = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid exclude pattern {pattern:?}"))?;
            builder.add(glob);
            pattern_list.push(pattern.to_string());
        }

        Ok(Self {
            glob_set: builder.build()?,
            patterns: pattern_list,
        })
    }

    /// Add a pattern to the exclude set.
    pub fn add_pattern(&mut self, pattern: &str) -> Result<()> {
        let mut patterns = self.patterns.clone();
        patterns.push(pattern.to_string());
        *self = Self::from_patterns(&patterns)?;
        Ok(())
    }

    /// Check if a catalog path should be excluded.
    ///
    /// Matches the whole path first, then every individual component, so a
    /// pattern like `@eaDir` excludes the directory and everything below it.
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        if self.glob_set.is_match(path) {
            return true;
        }

        Path::new(path).components().any(|component| match component {
            Component::Normal(name) => self.glob_set.is_match(name.to_string_lossy().as_ref()),
            _ => false,
        })
    }

    /// Get the list of patterns.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
