//! Reference resolution over the cache tiers.
//!
//! [`Db::fetch`] normalizes a reference, picks the matching processor,
//! and serves it from the static, local or global tier before falling back
//! to the backend. Fetched results are written back to the cache, with a
//! redirect entry when the backend answered with a different identifier.

mod builder;
mod combine;
mod search;

pub use builder::{init_bib_caches, DbBuilder};

use crate::cache::{self, CacheEntry, DbCache};
use crate::config::Settings;
use crate::dispatch::{self, FetchQueues, RetryConfig};
use crate::error::{BibrefError, Result};
use crate::identifier::{self, is_urn, normalize, split_compound, std_id};
use crate::models::{BibliographicItem, FetchOptions};
use crate::processor::Processor;
use crate::registry::Registry;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task;
use tracing::{debug, error, info};

/// Which cache tier an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Static,
    Local,
    Global,
}

pub struct Db {
    pub(crate) registry: Arc<Registry>,
    static_db: Option<DbCache>,
    local_db: Option<DbCache>,
    global_db: Option<DbCache>,
    pub(crate) settings: Settings,
    retry: RetryConfig,
    /// Guards every mutation of the cache tiers. Never held across an await.
    semaphore: Mutex<()>,
    pub(crate) queues: FetchQueues,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("registry", &self.registry)
            .field("static_db", &self.static_db)
            .field("local_db", &self.local_db)
            .field("global_db", &self.global_db)
            .finish()
    }
}

impl Db {
    pub fn builder(registry: Arc<Registry>) -> DbBuilder {
        DbBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve a reference.
    ///
    /// Only transient request failures that outlive the retry budget are
    /// returned as errors. Everything else is logged and reported as
    /// `Ok(None)`.
    pub async fn fetch(
        &self,
        reference: &str,
        year: Option<&str>,
        opts: &FetchOptions,
    ) -> Result<Option<BibliographicItem>> {
        recover(reference, self.fetch_inner(reference, year, opts).await)
    }

    /// Resolve a reference against an explicit backend, given by short name
    /// or prefix. Falls back to prefix matching when `stdclass` is unknown.
    pub async fn fetch_std(
        &self,
        code: &str,
        year: Option<&str>,
        stdclass: Option<&str>,
        opts: &FetchOptions,
    ) -> Result<Option<BibliographicItem>> {
        let code = normalize(code);
        let processor = stdclass
            .and_then(|class| {
                self.registry
                    .processors()
                    .find(|p| p.short() == class || p.prefix() == class)
                    .cloned()
            })
            .or_else(|| self.registry.processor_by_ref(code));
        let processor = match processor {
            Some(p) => p,
            None => return Ok(None),
        };
        recover(
            code,
            self.check_bibliocache(code, year, opts, processor.as_ref())
                .await,
        )
    }

    /// Cache-only lookup; never calls a backend.
    pub async fn fetch_db(
        &self,
        code: &str,
        year: Option<&str>,
        opts: &FetchOptions,
    ) -> Result<Option<BibliographicItem>> {
        let opts = opts.clone().with_fetch_db(true);
        self.fetch(code, year, &opts).await
    }

    /// Identifier type of the backend matching `code`, with the bare code.
    pub fn docid_type(&self, code: &str) -> (Option<String>, String) {
        match self.registry.processor_by_ref(code) {
            Some(processor) => {
                let (_, bare) = identifier::strip_id_wrapper(code, processor.as_ref());
                (Some(processor.idtype().to_string()), bare)
            }
            None => (None, code.to_string()),
        }
    }

    /// Read a raw entry, local tier first.
    pub fn load_entry(&self, key: &str) -> Result<Option<String>> {
        if let Some(local) = &self.local_db {
            if let Some(entry) = local.get(key)? {
                return Ok(Some(entry));
            }
        }
        match &self.global_db {
            Some(global) => global.get(key),
            None => Ok(None),
        }
    }

    /// Write a raw entry to every writable tier; `None` deletes it.
    pub fn save_entry(&self, key: &str, value: Option<&str>) -> Result<()> {
        let _guard = self.lock();
        if let Some(global) = &self.global_db {
            global.set(key, value)?;
        }
        if let Some(local) = &self.local_db {
            local.set(key, value)?;
        }
        Ok(())
    }

    /// Every stored record of the preferred tier wrapped in `<documents>`.
    pub fn to_xml(&self) -> Result<Option<String>> {
        let db = match self.local_db.as_ref().or(self.global_db.as_ref()) {
            Some(db) => db,
            None => return Ok(None),
        };
        let mut records = Vec::new();
        for entry in db.all()? {
            let (_, content) = entry?;
            records.push(strip_xml_declaration(&content).trim().to_string());
        }
        Ok(Some(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<documents>{}</documents>\n",
            records.join(" ")
        )))
    }

    /// Empty the writable tiers. The static tier is never touched.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock();
        if let Some(global) = &self.global_db {
            global.clear()?;
        }
        if let Some(local) = &self.local_db {
            local.clear()?;
        }
        Ok(())
    }

    /// Move a writable tier to `new_dir`.
    ///
    /// Returns `Ok(None)` when the tier is not configured or the target
    /// already exists.
    pub fn mv(&self, new_dir: &Path, tier: CacheTier) -> Result<Option<PathBuf>> {
        let db = match tier {
            CacheTier::Global => self.global_db.as_ref(),
            CacheTier::Local => self.local_db.as_ref(),
            CacheTier::Static => {
                return Err(BibrefError::Config {
                    message: "the static cache is read-only".to_string(),
                })
            }
        };
        let _guard = self.lock();
        match db {
            Some(db) => db.mv(new_dir),
            None => Ok(None),
        }
    }

    /// Directory of a tier, if configured.
    pub fn cache_dir(&self, tier: CacheTier) -> Option<PathBuf> {
        match tier {
            CacheTier::Static => self.static_db.as_ref(),
            CacheTier::Local => self.local_db.as_ref(),
            CacheTier::Global => self.global_db.as_ref(),
        }
        .map(DbCache::dir)
    }

    pub(crate) async fn fetch_inner(
        &self,
        reference: &str,
        year: Option<&str>,
        opts: &FetchOptions,
    ) -> Result<Option<BibliographicItem>> {
        let reference = normalize(reference);
        let processor = match self.registry.processor_by_ref(reference) {
            Some(p) => p,
            None => return Ok(None),
        };
        let code = if is_urn(reference) {
            processor
                .urn_to_code(reference)
                .unwrap_or_else(|| reference.to_string())
        } else {
            reference.to_string()
        };

        if processor.combines_documents() {
            if let Some(compound) = split_compound(&code) {
                return self
                    .combine_doc(&code, compound, year, opts, processor.as_ref())
                    .await
                    .map(Some);
            }
        }
        self.check_bibliocache(&code, year, opts, processor.as_ref())
            .await
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.semaphore
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a cache mutation under the tier mutex.
    ///
    /// Storage writes may wait on a file lock, so on a multi-threaded
    /// runtime the section runs via `block_in_place` and the worker's other
    /// tasks keep making progress.
    fn locked<T>(&self, section: impl FnOnce() -> Result<T>) -> Result<T> {
        let run = || {
            let _guard = self.lock();
            section()
        };
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(run)
            }
            _ => run(),
        }
    }

    pub(crate) async fn check_bibliocache(
        &self,
        code: &str,
        year: Option<&str>,
        opts: &FetchOptions,
        processor: &dyn Processor,
    ) -> Result<Option<BibliographicItem>> {
        let (id, searchcode) = std_id(code, year, opts, processor);

        if let Some(static_db) = &self.static_db {
            if let Some(entry) = static_db.get(&id)? {
                debug!("{} served from the static cache", id);
                return bib_retval(Some(entry), processor, &id);
            }
        }

        let (db, altdb) = match (&self.local_db, &self.global_db) {
            (Some(local), global) => (local, global.as_ref()),
            (None, Some(global)) => (global, None),
            (None, None) => {
                if opts.fetch_db {
                    return Ok(None);
                }
                let entry = self
                    .new_bib_entry(&searchcode, year, opts, processor, None)
                    .await?;
                return bib_retval(entry, processor, &id);
            }
        };

        self.locked(|| {
            if !db.valid_entry(&id, year)? {
                db.delete(&id)?;
            }
            Ok(())
        })?;

        let entry = match altdb {
            Some(altdb) => {
                if opts.fetch_db {
                    return bib_retval(altdb.get(&id)?, processor, &id);
                }
                self.locked(|| {
                    if altdb.valid_entry(&id, year)? {
                        db.clone_entry(&id, altdb)?;
                    }
                    Ok(())
                })?;
                let entry = self
                    .new_bib_entry(&searchcode, year, opts, processor, Some((db, &id)))
                    .await?;
                if !opts.no_cache {
                    self.locked(|| {
                        if !altdb.valid_entry(&id, year)? {
                            altdb.delete(&id)?;
                            altdb.clone_entry(&id, db)?;
                        }
                        Ok(())
                    })?;
                }
                entry
            }
            None => {
                if opts.fetch_db {
                    return bib_retval(db.get(&id)?, processor, &id);
                }
                self.new_bib_entry(&searchcode, year, opts, processor, Some((db, &id)))
                    .await?
            }
        };
        bib_retval(entry, processor, &id)
    }

    /// Cached entry for `id`, fetching it when absent.
    ///
    /// The returned value has redirects resolved.
    async fn new_bib_entry(
        &self,
        code: &str,
        year: Option<&str>,
        opts: &FetchOptions,
        processor: &dyn Processor,
        target: Option<(&DbCache, &str)>,
    ) -> Result<Option<String>> {
        if let (Some((db, id)), false) = (target, opts.no_cache) {
            let cached = self.locked(|| db.get(id))?;
            if let Some(entry) = cached {
                if cache::is_not_found(&entry) {
                    info!(
                        "({}) not found. The reference is cached as missing; \
                         pass the `no_cache` option to fetch it again.",
                        code
                    );
                    return Ok(None);
                }
                return Ok(Some(entry));
            }
        }
        self.fetch_entry(code, year, opts, processor, target).await
    }

    /// Call the backend and persist the result under `id`.
    ///
    /// A record whose identifier is not the requested one is stored under
    /// its own key, and `id` becomes a redirect to it.
    async fn fetch_entry(
        &self,
        code: &str,
        year: Option<&str>,
        opts: &FetchOptions,
        processor: &dyn Processor,
        target: Option<(&DbCache, &str)>,
    ) -> Result<Option<String>> {
        info!("({}) fetching from {}...", code, processor.short());
        let bib = dispatch::net_retry(processor, code, year, opts, &self.retry)
            .await
            .map_err(|e| {
                if e.is_transient() || matches!(e, BibrefError::Backend { .. }) {
                    e
                } else {
                    BibrefError::Backend {
                        backend: processor.short().to_string(),
                        code: code.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;
        let record = bib.as_ref().map(|b| processor.serialize(b));
        let entry = record
            .clone()
            .unwrap_or_else(|| cache::not_found_value(Local::now().date_naive()));

        let (db, id) = match target {
            Some(target) if !opts.no_cache => target,
            _ => return Ok(Some(entry)),
        };

        let canonical = bib
            .as_ref()
            .and_then(|b| b.primary_id())
            .filter(|bib_id| !id.contains(&format!("({})", bib_id)))
            .map(|bib_id| std_id(bib_id, None, &FetchOptions::default(), processor).0)
            .filter(|bid| bid != id);

        self.locked(|| match (canonical, record) {
            // The fresh record replaces whatever `bid` held, so a stale copy
            // or an old redirect back to `id` cannot survive.
            (Some(bid), Some(record)) => {
                debug!("({}) stored under {}, redirecting {}", code, bid, id);
                db.set(&bid, Some(&record))?;
                db.set(id, Some(&cache::redirect_value(&bid)))?;
                Ok(Some(record))
            }
            _ => {
                db.set(id, Some(&entry))?;
                Ok(Some(entry))
            }
        })
    }
}

/// Deserialize a cached value; not-found sentinels yield `None`.
fn bib_retval(
    entry: Option<String>,
    processor: &dyn Processor,
    id: &str,
) -> Result<Option<BibliographicItem>> {
    let entry = match entry {
        Some(entry) => entry,
        None => return Ok(None),
    };
    match CacheEntry::parse(&entry) {
        CacheEntry::Found(record) => processor
            .deserialize(record)
            .map(Some)
            .map_err(|e| BibrefError::InvalidEntry {
                key: id.to_string(),
                message: e.to_string(),
            }),
        CacheEntry::NotFound(_) => Ok(None),
        CacheEntry::Redirect(target) => Err(BibrefError::InvalidEntry {
            key: id.to_string(),
            message: format!("dangling redirect to {}", target),
        }),
    }
}

/// Keep transient failures, log and swallow the rest.
fn recover(
    code: &str,
    result: Result<Option<BibliographicItem>>,
) -> Result<Option<BibliographicItem>> {
    match result {
        Err(e) if !e.is_transient() => {
            error!("({}) {}", code, e);
            Ok(None)
        }
        other => other,
    }
}

fn strip_xml_declaration(record: &str) -> &str {
    let trimmed = record.trim_start();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            return &trimmed[end + 2..];
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_xml_declaration() {
        assert_eq!(
            strip_xml_declaration("<?xml version=\"1.0\"?>\n<bibitem/>").trim(),
            "<bibitem/>"
        );
        assert_eq!(strip_xml_declaration("<bibitem/>"), "<bibitem/>");
    }

    #[test]
    fn test_recover_keeps_transient_errors() {
        let transient = recover("RFC 1", Err(BibrefError::request("IETF", "timeout")));
        assert!(transient.unwrap_err().is_transient());

        let other = recover("RFC 1", Err(BibrefError::Other("broken".into())));
        assert_eq!(other.unwrap(), None);
    }
}
