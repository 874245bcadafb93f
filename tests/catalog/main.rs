// Test module entry point for catalog tests
// One test target; each component has its own module

mod common;

mod duplicate_tests;
mod hashing_tests;
mod scan_tests;
mod store_tests;
