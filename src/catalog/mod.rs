// Catalog core
// Persisted file/directory catalog with reconciliation, hashing and duplicate accounting

pub mod duplicates;
pub mod entry;
pub mod error;
pub mod hashing;
pub mod ingest;
pub mod reconcile;
mod schema;
pub mod store;

// Re-export commonly used types for convenience
pub use entry::{CatalogEntry, DirEntry, Entry, EntryKey, EntryKind, FileEntry, Metadata};
pub use error::CatalogError;
pub use hashing::{ContentDigest, FlushBatcher, HashJob, HashStats, SelectCursor, Sha256Digest};
pub use ingest::{ChangeEvent, EventIngest, IngestOutcome};
pub use reconcile::ReconcileReport;
pub use store::Catalog;
