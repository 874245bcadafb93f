//! Volume scanning.
//!
//! Produces the full listing of files and directories under each volume so
//! the catalog can be reconciled against it.

pub mod scanner;

pub use scanner::{ScanListing, ScanStats, Scanner};
