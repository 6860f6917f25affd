//! Centralized configuration for bibref.
//!
//! Constant groups follow the zero-sized-struct style; [`Settings`] carries
//! the few knobs that vary per process and can be loaded from JSON or the
//! environment.

use crate::error::{BibrefError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache layout and freshness configuration.
pub struct CacheConfig;

impl CacheConfig {
    /// Undated entries older than this many days are refetched.
    pub const ENTRY_TTL_DAYS: i64 = 60;
    /// Maximum redirect hops followed before the chain is treated as corrupt.
    pub const MAX_REDIRECT_HOPS: usize = 8;
    /// Bounded wait for the exclusive file lock around writes.
    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
    pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);
    pub const RECORD_EXT: &'static str = "xml";
    pub const NOT_FOUND_EXT: &'static str = "notfound";
    pub const REDIRECT_EXT: &'static str = "redirect";
    pub const VERSION_FILE: &'static str = "version";
    pub const NOT_FOUND_SENTINEL: &'static str = "not_found";
    pub const REDIRECT_SENTINEL: &'static str = "redirection";
}

/// Fetch and dispatch configuration.
pub struct FetchConfig;

impl FetchConfig {
    pub const DEFAULT_RETRIES: u32 = 1;
    pub const DEFAULT_THREADS: usize = 3;
    /// Pool queue capacity is this factor times the worker count.
    pub const QUEUE_FACTOR: usize = 2;
    pub const PARALLEL_ENV: &'static str = "BIBREF_FETCH_PARALLEL";
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
}

/// Default cache locations.
pub struct PathsConfig;

impl PathsConfig {
    pub const GLOBAL_CACHE_DIR: &'static str = ".relaton";
    pub const DEFAULT_LOCAL_CACHE: &'static str = "relaton";
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const STORAGE_ENV: &'static str = "BIBREF_STORAGE";
    pub const BUCKET_ENV: &'static str = "BIBREF_BUCKET";
}

/// Which backend every cache tier in the process persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    #[default]
    Filesystem,
    ObjectStore,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Filesystem => "filesystem",
            StorageMode::ObjectStore => "object_store",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "filesystem" | "file" | "fs" => Some(StorageMode::Filesystem),
            "object_store" | "s3" | "api" => Some(StorageMode::ObjectStore),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Process-wide runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    /// Storage backend shared by all tiers.
    pub storage: StorageMode,
    /// Bucket name used in object-store mode.
    pub object_store_bucket: Option<String>,
    /// Async worker count override; beats the processor's preference.
    pub fetch_parallel: Option<usize>,
    /// Base delay between fetch retries, in milliseconds.
    pub retry_base_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage: StorageMode::default(),
            object_store_bucket: None,
            fetch_parallel: None,
            retry_base_delay_ms: FetchConfig::RETRY_BASE_DELAY.as_millis() as u64,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, then overlay the environment.
    ///
    /// A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| BibrefError::io_with_path(e, path))?;
            serde_json::from_str(&content).map_err(|e| BibrefError::Json {
                message: format!("Failed to parse {}: {}", path.display(), e),
                source: Some(e),
            })?
        } else {
            Settings::default()
        };
        Ok(settings.with_env())
    }

    /// Defaults overlaid with the environment.
    pub fn from_env() -> Self {
        Settings::default().with_env()
    }

    fn with_env(mut self) -> Self {
        if let Some(n) = std::env::var(FetchConfig::PARALLEL_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            self.fetch_parallel = Some(n);
        }
        if let Some(mode) = std::env::var(PathsConfig::STORAGE_ENV)
            .ok()
            .and_then(|v| StorageMode::from_str(&v))
        {
            self.storage = mode;
        }
        if let Ok(bucket) = std::env::var(PathsConfig::BUCKET_ENV) {
            self.object_store_bucket = Some(bucket);
        }
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// `~/.relaton/cache`, the user-scoped cache shared across projects.
pub fn global_cache_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| BibrefError::Config {
        message: "Could not determine home directory".to_string(),
    })?;
    Ok(home
        .join(PathsConfig::GLOBAL_CACHE_DIR)
        .join(PathsConfig::CACHE_DIR_NAME))
}

/// `<name>/cache`, with an empty name meaning the default project dir.
pub fn local_cache_dir(name: &str) -> PathBuf {
    let name = if name.is_empty() {
        PathsConfig::DEFAULT_LOCAL_CACHE
    } else {
        name
    };
    Path::new(name).join(PathsConfig::CACHE_DIR_NAME)
}
