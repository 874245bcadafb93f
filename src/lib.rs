// Library module for volcat
// Re-exports modules for use in integration tests and the CLI

pub mod catalog;
pub mod config;
pub mod exclude;
pub mod paths;
pub mod scan;
pub mod watch;
