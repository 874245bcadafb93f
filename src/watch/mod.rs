//! Live filesystem watching.

pub mod watcher;

pub use watcher::{EventDebouncer, EventTranslator, VolumeWatcher};
