// Catalog path utilities
// Converts filesystem paths into the volume-relative, forward-slash form stored in the catalog

use std::path::{Component, Path, PathBuf};

/// Normalize a path string to forward slashes
/// Catalog paths are stored identically regardless of the host platform
pub fn normalize_path_string(path_str: &str) -> String {
    let normalized = path_str.replace('\\', "/");
    normalized.trim_matches('/').to_string()
}

/// Convert a relative filesystem path into its catalog form
/// Drops "." components so `./a/b` and `a/b` map to the same key
pub fn catalog_path(relative: &Path) -> String {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            _ => continue,
        }
    }
    normalize_path_string(&parts.join("/"))
}

/// Parent of a catalog path; top-level entries have the empty parent
pub fn parent_of(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

/// First component of a catalog path (the top-level directory or file name)
pub fn top_level(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Get a path relative to a volume root
/// Returns None when the path lies outside the root or is the root itself
pub fn relative_to_root(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let catalog = catalog_path(relative);
    if catalog.is_empty() {
        None
    } else {
        Some(catalog)
    }
}

/// Label under which a volume root is catalogued
/// The configured root path, without trailing separators
pub fn volume_label(root: &Path) -> String {
    let label = normalize_path_string(&root.to_string_lossy());
    if root.has_root() {
        format!("/{label}")
    } else {
        label
    }
}

/// Resolve a catalog key back to a filesystem location
pub fn resolve(volume: &str, path: &str) -> PathBuf {
    let mut full = PathBuf::from(volume);
    for part in path.split('/').filter(|p| !p.is_empty()) {
        full.push(part);
    }
    full
}
