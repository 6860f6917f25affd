//! Builder for configuring [`Db`] construction.

use super::Db;
use crate::cache::DbCache;
use crate::config::{self, Settings};
use crate::dispatch::{FetchQueues, RetryConfig};
use crate::error::Result;
use crate::registry::Registry;
use crate::storage::{self, ObjectStoreClient, Storage};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Builder for [`Db`].
///
/// # Example
///
/// ```rust,ignore
/// let db = Db::builder(registry)
///     .global_cache(dirs::home_dir().unwrap().join(".relaton/cache"))
///     .local_cache("relaton/cache")
///     .build()?;
/// ```
pub struct DbBuilder {
    registry: Arc<Registry>,
    global_cache: Option<PathBuf>,
    local_cache: Option<PathBuf>,
    static_cache: Option<PathBuf>,
    settings: Settings,
    storage: Option<Arc<dyn Storage>>,
    object_store: Option<Arc<dyn ObjectStoreClient>>,
    retry: Option<RetryConfig>,
    flush_caches: bool,
}

impl DbBuilder {
    /// Start from defaults overlaid with the environment, see
    /// [`Settings::from_env`].
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            global_cache: None,
            local_cache: None,
            static_cache: None,
            settings: Settings::from_env(),
            storage: None,
            object_store: None,
            retry: None,
            flush_caches: false,
        }
    }

    /// User-scoped tier shared across projects.
    pub fn global_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_cache = Some(dir.into());
        self
    }

    /// Project-scoped tier, preferred for reads.
    pub fn local_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_cache = Some(dir.into());
        self
    }

    /// Read-only tier consulted before everything else.
    pub fn static_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_cache = Some(dir.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Use an explicit storage backend instead of the one `settings` selects.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Bucket client for object-store mode.
    pub fn object_store_client(mut self, client: Arc<dyn ObjectStoreClient>) -> Self {
        self.object_store = Some(client);
        self
    }

    /// Backoff between retried backend calls.
    ///
    /// Default: derived from `settings.retry_base_delay_ms`.
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Wipe the writable tiers before opening them.
    pub fn flush_caches(mut self, flush: bool) -> Self {
        self.flush_caches = flush;
        self
    }

    pub fn build(self) -> Result<Db> {
        let storage = match self.storage {
            Some(storage) => storage,
            None => storage::from_settings(&self.settings, self.registry.clone(), self.object_store)?,
        };

        if self.flush_caches {
            for dir in self.global_cache.iter().chain(self.local_cache.iter()) {
                info!("Flushing cache at {}", dir.display());
                storage.remove_all(dir)?;
            }
        }

        let global_db = self
            .global_cache
            .map(|dir| DbCache::open(dir, storage.clone()))
            .transpose()?;
        let local_db = self
            .local_cache
            .map(|dir| DbCache::open(dir, storage.clone()))
            .transpose()?;
        let static_db = self
            .static_cache
            .map(|dir| DbCache::new(dir, storage.clone()));

        let retry = self.retry.unwrap_or_else(|| {
            RetryConfig::new().with_base_delay(self.settings.retry_base_delay())
        });

        Ok(Db {
            registry: self.registry,
            static_db,
            local_db,
            global_db,
            settings: self.settings,
            retry,
            semaphore: Mutex::new(()),
            queues: FetchQueues::default(),
        })
    }
}

/// Open the default cache locations.
///
/// `global_cache` enables `~/.relaton/cache`. `local_cache` names the
/// project cache directory; an empty name means `relaton`, giving
/// `relaton/cache`. `flush_caches` wipes both before opening.
pub fn init_bib_caches(
    registry: Arc<Registry>,
    global_cache: bool,
    local_cache: Option<&str>,
    flush_caches: bool,
) -> Result<Db> {
    let mut builder = Db::builder(registry).flush_caches(flush_caches);
    if global_cache {
        builder = builder.global_cache(config::global_cache_dir()?);
    }
    if let Some(name) = local_cache {
        builder = builder.local_cache(config::local_cache_dir(name));
    }
    builder.build()
}
