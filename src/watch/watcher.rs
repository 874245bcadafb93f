//! Filesystem watcher for live catalog updates.
//!
//! Wraps a notify watcher over every volume root and turns raw notify events
//! into catalog change events.

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::catalog::{ChangeEvent, Entry, EntryKey, EntryKind, Metadata};
use crate::exclude::ExcludePatterns;
use crate::paths;

/// A watched volume root and the label its entries are catalogued under.
#[derive(Debug, Clone)]
struct WatchedVolume {
    root: PathBuf,
    label: String,
}

/// How long the source half of a rename waits for its destination.
pub const DEFAULT_RENAME_WINDOW: Duration = Duration::from_secs(1);

/// Source half of a rename still waiting for its pair.
#[derive(Debug, Clone)]
struct PendingRename {
    key: EntryKey,
    tracker: Option<usize>,
    seen: Instant,
}

/// Converts notify events into catalog changes.
#[derive(Debug, Clone)]
pub struct EventTranslator {
    volumes: Vec<WatchedVolume>,
    denylist: Vec<String>,
    exclude: ExcludePatterns,
    rename_window: Duration,
    pending_renames: Vec<PendingRename>,
}

impl EventTranslator {
    pub fn new(roots: &[PathBuf]) -> Self {
        let volumes = roots
            .iter()
            .map(|root| WatchedVolume {
                root: root.clone(),
                label: paths::volume_label(root),
            })
            .collect();
        Self {
            volumes,
            denylist: Vec::new(),
            exclude: ExcludePatterns::default(),
            rename_window: DEFAULT_RENAME_WINDOW,
            pending_renames: Vec::new(),
        }
    }

    /// Time an unpaired rename source waits before it is treated as deleted.
    pub fn with_rename_window(mut self, window: Duration) -> Self {
        self.rename_window = window;
        self
    }

    pub fn with_denylist(mut self, denylist: Vec<String>) -> Self {
        self.denylist = denylist.into_iter().filter(|p| !p.is_empty()).collect();
        self
    }

    pub fn with_exclude(mut self, exclude: ExcludePatterns) -> Self {
        self.exclude = exclude;
        self
    }

    /// Map an absolute path to its catalog key, or None when it is outside
    /// every volume, denylisted or excluded.
    pub fn locate(&self, path: &Path) -> Option<EntryKey> {
        // Longest root first so nested volumes resolve to the innermost one
        let volume = self
            .volumes
            .iter()
            .filter(|v| path.starts_with(&v.root))
            .max_by_key(|v| v.root.as_os_str().len())?;
        let relative = paths::relative_to_root(path, &volume.root)?;
        let top = paths::top_level(&relative);
        if self.denylist.iter().any(|prefix| top.starts_with(prefix.as_str())) {
            return None;
        }
        if self.exclude.is_excluded(&relative) {
            return None;
        }
        Some(EntryKey::new(volume.label.clone(), relative))
    }

    /// Translate one notify event. Unsupported or irrelevant events produce
    /// nothing.
    pub fn translate(&mut self, event: &Event) -> Vec<ChangeEvent> {
        match &event.kind {
            EventKind::Create(_) => event
                .paths
                .iter()
                .filter_map(|path| self.created(path))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if let Some(tracker) = event.attrs.tracker() {
                    self.pending_renames.retain(|p| p.tracker != Some(tracker));
                }
                event
                    .paths
                    .iter()
                    .filter_map(|path| self.created(path))
                    .collect()
            }
            EventKind::Remove(remove) => event
                .paths
                .iter()
                .filter_map(|path| self.locate(path))
                .flat_map(|key| removed_kinds(remove).iter().map(move |kind| ChangeEvent::Deleted {
                    kind: *kind,
                    key: key.clone(),
                }))
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
                [from, to] => {
                    self.settle_rename(event.attrs.tracker(), from);
                    self.moved(from, to).into_iter().collect()
                }
                _ => Vec::new(),
            },
            EventKind::Modify(ModifyKind::Name(RenameMode::Any | RenameMode::Other)) => event
                .paths
                .iter()
                .flat_map(|path| self.renamed_unpaired(path))
                .collect(),
            // Held until the paired half arrives or the rename window lapses
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                let tracker = event.attrs.tracker();
                for path in &event.paths {
                    if let Some(key) = self.locate(path) {
                        self.pending_renames.push(PendingRename {
                            key,
                            tracker,
                            seen: Instant::now(),
                        });
                    }
                }
                Vec::new()
            }
            EventKind::Modify(_) => event
                .paths
                .iter()
                .filter_map(|path| {
                    let key = self.locate(path)?;
                    let kind = if path.is_dir() {
                        EntryKind::Directory
                    } else {
                        EntryKind::File
                    };
                    Some(ChangeEvent::Modified { kind, key })
                })
                .collect(),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
        }
    }

    /// Rename sources whose pair never arrived within the rename window,
    /// as deletions. The entry is gone, so both kinds are deleted.
    pub fn expire_renames(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let window = self.rename_window;
        let (expired, waiting): (Vec<_>, Vec<_>) = self
            .pending_renames
            .drain(..)
            .partition(|p| now.saturating_duration_since(p.seen) >= window);
        self.pending_renames = waiting;

        expired
            .into_iter()
            // Something took the source path back in the meantime
            .filter(|pending| fs::symlink_metadata(pending.key.full_path()).is_err())
            .flat_map(|pending| {
                debug!(key = %pending.key, "rename source left the volumes");
                [EntryKind::File, EntryKind::Directory].map(|kind| ChangeEvent::Deleted {
                    kind,
                    key: pending.key.clone(),
                })
            })
            .collect()
    }

    /// Number of rename sources waiting for their pair.
    pub fn pending_renames(&self) -> usize {
        self.pending_renames.len()
    }

    fn settle_rename(&mut self, tracker: Option<usize>, from: &Path) {
        let key = self.locate(from);
        self.pending_renames.retain(|p| {
            let same_tracker = tracker.is_some() && p.tracker == tracker;
            let same_key = key.as_ref() == Some(&p.key);
            !(same_tracker || same_key)
        });
    }

    fn created(&self, path: &Path) -> Option<ChangeEvent> {
        let key = self.locate(path)?;
        let (kind, meta) = stat(path)?;
        Some(ChangeEvent::Created(Entry::new(kind, key, meta)))
    }

    fn moved(&self, from: &Path, to: &Path) -> Option<ChangeEvent> {
        let kind = if fs::symlink_metadata(to).map(|m| m.is_dir()).unwrap_or(false) {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        match (self.locate(from), self.locate(to)) {
            (Some(from_key), Some(to_key)) => {
                let to_parent = paths::parent_of(&to_key.path);
                Some(ChangeEvent::Moved {
                    kind,
                    from: from_key,
                    to: to_key,
                    to_parent,
                })
            }
            // Moved in from an untracked location
            (None, Some(_)) => self.created(to),
            // Moved out of every volume or into an excluded location
            (Some(from_key), None) => Some(ChangeEvent::Deleted { kind, key: from_key }),
            (None, None) => None,
        }
    }

    // Rename reported without pairing: the path either exists now or is gone
    fn renamed_unpaired(&self, path: &Path) -> Vec<ChangeEvent> {
        if fs::symlink_metadata(path).is_ok() {
            return self.created(path).into_iter().collect();
        }
        match self.locate(path) {
            Some(key) => vec![
                ChangeEvent::Deleted {
                    kind: EntryKind::File,
                    key: key.clone(),
                },
                ChangeEvent::Deleted {
                    kind: EntryKind::Directory,
                    key,
                },
            ],
            None => Vec::new(),
        }
    }
}

fn removed_kinds(remove: &RemoveKind) -> &'static [EntryKind] {
    match remove {
        RemoveKind::File => &[EntryKind::File],
        RemoveKind::Folder => &[EntryKind::Directory],
        _ => &[EntryKind::File, EntryKind::Directory],
    }
}

// Regular files and directories only; symlinks and vanished paths are skipped
fn stat(path: &Path) -> Option<(EntryKind, Metadata)> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) => {
            trace!(path = %path.display(), error = %e, "created path vanished");
            return None;
        }
    };
    let kind = if meta.is_dir() {
        EntryKind::Directory
    } else if meta.is_file() {
        EntryKind::File
    } else {
        return None;
    };
    Some((kind, Metadata::from_fs(&meta)))
}

/// File system watcher over every volume root.
pub struct VolumeWatcher {
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
    translator: EventTranslator,
    watched_paths: Vec<PathBuf>,
}

impl VolumeWatcher {
    /// Watch every root that exists; missing roots are logged and skipped.
    pub fn new(translator: EventTranslator) -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        let mut watched_paths = Vec::new();
        for volume in &translator.volumes {
            if !volume.root.is_dir() {
                warn!(volume = %volume.root.display(), "volume root missing, not watched");
                continue;
            }
            watcher
                .watch(&volume.root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", volume.root.display()))?;
            debug!(volume = %volume.root.display(), "watching volume");
            watched_paths.push(volume.root.clone());
        }

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
            translator,
            watched_paths,
        })
    }

    /// Wait up to `timeout` for the next batch of changes.
    ///
    /// Returns `None` once the underlying watcher has shut down. Watcher
    /// errors are logged and yield an empty batch. Rename sources left
    /// unpaired past the rename window are reported as deletions here.
    pub fn next_changes(&mut self, timeout: Duration) -> Option<Vec<ChangeEvent>> {
        let mut changes = match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => {
                let changes = self.translator.translate(&event);
                trace!(kind = ?event.kind, changes = changes.len(), "notify event");
                changes
            }
            Ok(Err(e)) => {
                warn!(error = %e, "watch error");
                Vec::new()
            }
            Err(RecvTimeoutError::Timeout) => Vec::new(),
            Err(RecvTimeoutError::Disconnected) => return None,
        };
        changes.extend(self.translator.expire_renames(Instant::now()));
        Some(changes)
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched_paths
    }
}

/// Collapses bursts of modification notices for the same entry.
///
/// Only `Modified` events are coalesced; any other event for a key resets
/// its window so that create/delete ordering is never lost.
#[derive(Debug)]
pub struct EventDebouncer {
    window: Duration,
    recent: HashMap<EntryKey, Instant>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: HashMap::new(),
        }
    }

    /// Default debouncer (100ms window).
    pub fn default_window() -> Self {
        Self::new(Duration::from_millis(100))
    }

    /// Check if an event should be processed (not a duplicate).
    pub fn should_process(&mut self, event: &ChangeEvent) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.recent.retain(|_, seen| now.duration_since(*seen) < window);

        match event {
            ChangeEvent::Modified { key, .. } => {
                if self.recent.contains_key(key) {
                    return false;
                }
                self.recent.insert(key.clone(), now);
                true
            }
            ChangeEvent::Moved { from, to, .. } => {
                self.recent.remove(from);
                self.recent.remove(to);
                true
            }
            other => {
                self.recent.remove(other.key());
                true
            }
        }
    }

    /// Process events and return only non-duplicate ones.
    pub fn filter(&mut self, events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
        events
            .into_iter()
            .filter(|e| self.should_process(e))
            .collect()
    }
}
