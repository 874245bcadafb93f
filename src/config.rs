// Configuration loading
// TOML file first, then environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::hashing::{DEFAULT_FLUSH_INTERVAL, DEFAULT_FLUSH_MAX_ITEMS, DEFAULT_SELECT_LIMIT};
use crate::exclude::{ExcludePatterns, DEFAULT_EXCLUDES};

const APP_DIR: &str = "volcat";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Volume roots to catalog
    pub volumes: Vec<PathBuf>,
    /// Top-level name prefixes never scanned or watched
    pub denylist: Vec<String>,
    /// Glob patterns excluded at any depth
    pub exclude: Vec<String>,
    /// SQLite catalog location
    pub database: PathBuf,
    pub hash: HashConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    pub select_limit: usize,
    pub flush_interval_secs: u64,
    pub flush_max_items: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            select_limit: DEFAULT_SELECT_LIMIT,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL.as_secs(),
            flush_max_items: DEFAULT_FLUSH_MAX_ITEMS,
        }
    }
}

impl HashConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volumes: vec![PathBuf::from("/volume1")],
            denylist: Vec::new(),
            exclude: DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect(),
            database: default_database_path(),
            hash: HashConfig::default(),
        }
    }
}

/// `<data_local_dir>/volcat/catalog.db`, or the working directory when the
/// platform has no data directory
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_default()
        .join("catalog.db")
}

/// `<config_dir>/volcat/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

impl Config {
    /// Load configuration from `path`, or the default location when it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `VOLUMES`, `DENYLIST` and `VOLCAT_DATABASE`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(volumes) = lookup("VOLUMES") {
            self.volumes = split_list(&volumes).into_iter().map(PathBuf::from).collect();
        }
        if let Some(denylist) = lookup("DENYLIST") {
            self.denylist = split_list(&denylist);
        }
        if let Some(database) = lookup("VOLCAT_DATABASE").filter(|d| !d.is_empty()) {
            self.database = PathBuf::from(database);
        }
    }

    pub fn exclude_patterns(&self) -> Result<ExcludePatterns> {
        ExcludePatterns::from_patterns(&self.exclude)
    }
}

// Comma separated; empty items are dropped
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
