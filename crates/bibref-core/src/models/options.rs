//! Options accepted by the fetch operations.

use crate::config::FetchConfig;
use serde::{Deserialize, Serialize};

/// Per-call fetch options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FetchOptions {
    /// Request the "(all parts)" form of a multi-part standard.
    pub all_parts: bool,
    /// Ask the backend to keep the year in the returned identifier.
    pub keep_year: bool,
    /// Total backend attempts for transient request failures.
    pub retries: u32,
    /// Bypass cached entries and skip write-back.
    pub no_cache: bool,
    /// Read from the cache only; never call a backend.
    pub fetch_db: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            all_parts: false,
            keep_year: false,
            retries: FetchConfig::DEFAULT_RETRIES,
            no_cache: false,
            fetch_db: false,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_all_parts(mut self, all_parts: bool) -> Self {
        self.all_parts = all_parts;
        self
    }

    pub fn with_keep_year(mut self, keep_year: bool) -> Self {
        self.keep_year = keep_year;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_fetch_db(mut self, fetch_db: bool) -> Self {
        self.fetch_db = fetch_db;
        self
    }
}
