// Catalog error types
// Every failure is scoped to one reconcile pass, batch flush or event

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use super::entry::EntryKind;

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Connection, transaction or constraint failure. The enclosing
    /// transaction has been rolled back.
    #[error("catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A catalogued entry no longer exists at its expected location.
    #[error("not found on disk: {}", path.display())]
    NotFoundOnDisk { path: PathBuf },

    /// Content could not be read while computing its digest.
    #[error("failed to compute digest for {}: {source}", path.display())]
    Digest { path: PathBuf, source: io::Error },

    /// Other filesystem failure with the path it happened on.
    #[error("I/O error while {operation} {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// A reconcile batch mixed files and directories.
    #[error("expected only {expected:?} entries, found a {found:?}")]
    KindMismatch { expected: EntryKind, found: EntryKind },
}

impl CatalogError {
    /// Build an error from an I/O failure on a path, mapping `NotFound`
    /// onto [`CatalogError::NotFoundOnDisk`].
    pub fn from_io_error(err: io::Error, operation: &'static str, path: PathBuf) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => CatalogError::NotFoundOnDisk { path },
            _ => CatalogError::Io {
                path,
                operation,
                source: err,
            },
        }
    }

    /// Whether this error came from the store rather than the filesystem.
    pub fn is_store(&self) -> bool {
        matches!(self, CatalogError::Store(_))
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
