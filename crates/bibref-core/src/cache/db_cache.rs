//! One cache tier rooted at a directory.
//!
//! Keys of the form `PREFIX(CODE)` live at `dir/prefix/sanitized_code.ext`;
//! keys without a wrapper live flat under `dir`. Each prefix subdirectory
//! carries its own grammar version marker.

use super::entry::{self, CacheEntry};
use crate::config::CacheConfig;
use crate::error::{BibrefError, Result};
use crate::storage::{self, AllEntries, Storage};
use chrono::{Local, NaiveDate};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, RwLock};
use tracing::{debug, warn};

static PREFIX_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^(]+)\(([^)]+)").unwrap());
static WRAPPED_UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-:\s/()]").unwrap());
static FLAT_UNSAFE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-:\s]").unwrap());
static REPEATED_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());
static COMMA_OR_TRAILING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",|_$").unwrap());

pub struct DbCache {
    dir: RwLock<PathBuf>,
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for DbCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCache").field("dir", &self.dir()).finish()
    }
}

impl DbCache {
    /// Open a tier without touching its contents.
    pub fn new(dir: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Self {
        Self {
            dir: RwLock::new(dir.into()),
            storage,
        }
    }

    /// Open a writable tier, wiping every category whose version marker no
    /// longer matches the live grammar hash.
    pub fn open(dir: impl Into<PathBuf>, storage: Arc<dyn Storage>) -> Result<Self> {
        let cache = Self::new(dir, storage);
        cache.check_version()?;
        Ok(cache)
    }

    pub fn dir(&self) -> PathBuf {
        match self.dir.read() {
            Ok(dir) => dir.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Remove categories written under an obsolete grammar.
    pub fn check_version(&self) -> Result<()> {
        for subdir in self.storage.subdirs(&self.dir())? {
            if !self.storage.check_version(&subdir)? {
                warn!(
                    "Cache at {} was written with an obsolete grammar, clearing it",
                    subdir.display()
                );
                self.storage.remove_all(&subdir)?;
            }
        }
        Ok(())
    }

    /// Store a value, replacing any entry of another kind under `key`.
    /// `None` or an empty value deletes the entry.
    pub fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let value = match value {
            Some(v) if !v.is_empty() => v,
            _ => return self.delete(key),
        };
        let ext = CacheEntry::parse(value).extension();
        let prefix_dir = self.dir().join(prefix(key));
        self.storage.save(&prefix_dir, &self.filename(key), ext, value)
    }

    /// Stored value with redirects followed to the final entry.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut current = key.to_string();
        let mut hops = 0;
        loop {
            let value = self.get_raw(&current)?;
            let target = match value.as_deref().and_then(entry::redirect_target) {
                Some(target) => target.to_string(),
                None => return Ok(value),
            };
            hops += 1;
            if hops > CacheConfig::MAX_REDIRECT_HOPS {
                return Err(BibrefError::RedirectLoop {
                    key: key.to_string(),
                    hops: CacheConfig::MAX_REDIRECT_HOPS,
                });
            }
            debug!("{} redirects to {}", current, target);
            current = target;
        }
    }

    /// Stored value as-is, redirect markers included.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.storage.get(&self.filename(key))
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.storage.delete(&self.filename(key))
    }

    /// Copy `key` from `other` if absent here, following copied redirects.
    pub fn clone_entry(&self, key: &str, other: &DbCache) -> Result<()> {
        let mut current = key.to_string();
        for _ in 0..=CacheConfig::MAX_REDIRECT_HOPS {
            let value = match self.get_raw(&current)? {
                Some(value) => Some(value),
                None => {
                    let copied = other.get_raw(&current)?;
                    self.set(&current, copied.as_deref())?;
                    copied
                }
            };
            match value.as_deref().and_then(entry::redirect_target) {
                Some(target) => current = target.to_string(),
                None => return Ok(()),
            }
        }
        Err(BibrefError::RedirectLoop {
            key: key.to_string(),
            hops: CacheConfig::MAX_REDIRECT_HOPS,
        })
    }

    /// Date the entry under `key` was fetched.
    pub fn fetched(&self, key: &str) -> Result<Option<NaiveDate>> {
        Ok(self
            .get(key)?
            .and_then(|value| CacheEntry::parse(&value).fetched()))
    }

    /// Whether the entry may be served without refetching.
    ///
    /// Dated requests accept any present entry; undated ones expire after
    /// [`CacheConfig::ENTRY_TTL_DAYS`].
    pub fn valid_entry(&self, key: &str, year: Option<&str>) -> Result<bool> {
        self.valid_entry_on(key, year, Local::now().date_naive())
    }

    pub(crate) fn valid_entry_on(
        &self,
        key: &str,
        year: Option<&str>,
        today: NaiveDate,
    ) -> Result<bool> {
        let value = match self.get(key)? {
            Some(value) => value,
            None => return Ok(false),
        };
        if year.is_some() {
            return Ok(true);
        }
        Ok(CacheEntry::parse(&value)
            .fetched()
            .is_some_and(|date| (today - date).num_days() < CacheConfig::ENTRY_TTL_DAYS))
    }

    /// Every stored record in this tier, read lazily.
    pub fn all(&self) -> Result<AllEntries<'_>> {
        storage::all(self.storage.as_ref(), &self.dir())
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.remove_all(&self.dir())
    }

    /// Move the tier to `new_dir`. Refuses when the target exists.
    pub fn mv(&self, new_dir: &Path) -> Result<Option<PathBuf>> {
        if self.storage.exists(new_dir)? {
            warn!(
                "target directory {} exists, cache was not moved",
                new_dir.display()
            );
            return Ok(None);
        }
        let mut dir = match self.dir.write() {
            Ok(dir) => dir,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.storage.exists(&dir)? {
            self.storage.rename(&dir, new_dir)?;
        }
        *dir = new_dir.to_path_buf();
        Ok(Some(new_dir.to_path_buf()))
    }

    /// Storage path for `key`, without extension.
    pub fn filename(&self, key: &str) -> PathBuf {
        let dir = self.dir();
        let lower = key.to_lowercase();
        match PREFIX_CODE.captures(&lower) {
            Some(caps) => {
                let code = WRAPPED_UNSAFE.replace_all(&caps[2], "_");
                dir.join(&caps[1]).join(tidy(&code))
            }
            None => dir.join(tidy(&FLAT_UNSAFE.replace_all(key, "_"))),
        }
    }
}

/// Collapse `_` runs, then drop the first comma or a trailing `_`.
fn tidy(code: &str) -> String {
    let code = REPEATED_UNDERSCORE.replace_all(code, "_");
    COMMA_OR_TRAILING.replace(&code, "").into_owned()
}

/// Lowercased category of a key, empty for unwrapped keys.
pub fn prefix(key: &str) -> String {
    key.split_once('(')
        .map(|(prefix, _)| prefix.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::storage::FileStorage;
    use tempfile::TempDir;

    fn cache(tmp: &TempDir) -> DbCache {
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(Arc::new(Registry::new())));
        DbCache::new(tmp.path().join("cache"), storage)
    }

    #[test]
    fn test_filename() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        let root = tmp.path().join("cache");
        assert_eq!(c.filename("ISO(ISO 19115-1)"), root.join("iso/iso_19115_1"));
        assert_eq!(
            c.filename("ISO(ISO 19115:2014 (all parts))"),
            root.join("iso/iso_19115_2014_all_parts")
        );
        assert_eq!(c.filename("CN(GB/T 20223-2006)"), root.join("cn/gb_t_20223_2006"));
        assert_eq!(c.filename("ITU(ITU-T G.989.2, Amd 1)"), root.join("itu/itu_t_g.989.2_amd_1"));
        assert_eq!(c.filename("RFC 8341"), root.join("RFC_8341"));
        assert_eq!(c.filename("RFC  8341 -"), root.join("RFC_8341"));
        assert_eq!(c.filename("BSI 1, Amd 1"), root.join("BSI_1_Amd_1"));
    }

    #[test]
    fn test_prefix() {
        assert_eq!(prefix("IETF(RFC 8341)"), "ietf");
        assert_eq!(prefix("RFC 8341"), "");
    }

    #[test]
    fn test_set_get_delete() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 1)", Some("<bibitem/>")).unwrap();
        assert!(tmp.path().join("cache/iso/iso_1.xml").exists());
        assert_eq!(c.get("ISO(ISO 1)").unwrap().as_deref(), Some("<bibitem/>"));

        c.set("ISO(ISO 1)", None).unwrap();
        assert_eq!(c.get("ISO(ISO 1)").unwrap(), None);
    }

    #[test]
    fn test_set_replaces_other_entry_kinds() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 7)", Some("<bibitem>old</bibitem>")).unwrap();
        c.set("ISO(ISO 7)", Some("redirection ISO(ISO 7:2001)")).unwrap();
        assert!(!tmp.path().join("cache/iso/iso_7.xml").exists());
        assert_eq!(
            c.get_raw("ISO(ISO 7)").unwrap().as_deref(),
            Some("redirection ISO(ISO 7:2001)")
        );

        c.set("ISO(ISO 7)", Some("not_found 2024-01-02")).unwrap();
        assert!(!tmp.path().join("cache/iso/iso_7.redirect").exists());
        assert_eq!(
            c.get_raw("ISO(ISO 7)").unwrap().as_deref(),
            Some("not_found 2024-01-02")
        );
    }

    #[test]
    fn test_get_follows_redirect() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 1:2000)", Some("<bibitem>dated</bibitem>")).unwrap();
        c.set("ISO(ISO 1)", Some("redirection ISO(ISO 1:2000)")).unwrap();
        assert!(tmp.path().join("cache/iso/iso_1.redirect").exists());
        assert_eq!(
            c.get("ISO(ISO 1)").unwrap().as_deref(),
            Some("<bibitem>dated</bibitem>")
        );
        assert_eq!(
            c.get_raw("ISO(ISO 1)").unwrap().as_deref(),
            Some("redirection ISO(ISO 1:2000)")
        );
    }

    #[test]
    fn test_redirect_cycle_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO A)", Some("redirection ISO(ISO B)")).unwrap();
        c.set("ISO(ISO B)", Some("redirection ISO(ISO A)")).unwrap();
        assert!(matches!(
            c.get("ISO(ISO A)"),
            Err(BibrefError::RedirectLoop { .. })
        ));
    }

    #[test]
    fn test_clone_entry_copies_redirect_chain() {
        let from_tmp = TempDir::new().unwrap();
        let to_tmp = TempDir::new().unwrap();
        let from = cache(&from_tmp);
        let to = cache(&to_tmp);
        from.set("ISO(ISO 1)", Some("redirection ISO(ISO 1:2000)")).unwrap();
        from.set("ISO(ISO 1:2000)", Some("<bibitem/>")).unwrap();

        to.clone_entry("ISO(ISO 1)", &from).unwrap();
        assert_eq!(
            to.get_raw("ISO(ISO 1)").unwrap().as_deref(),
            Some("redirection ISO(ISO 1:2000)")
        );
        assert_eq!(to.get("ISO(ISO 1)").unwrap().as_deref(), Some("<bibitem/>"));
    }

    #[test]
    fn test_clone_entry_keeps_existing() {
        let from_tmp = TempDir::new().unwrap();
        let to_tmp = TempDir::new().unwrap();
        let from = cache(&from_tmp);
        let to = cache(&to_tmp);
        from.set("ISO(ISO 1)", Some("<bibitem>global</bibitem>")).unwrap();
        to.set("ISO(ISO 1)", Some("<bibitem>local</bibitem>")).unwrap();
        to.clone_entry("ISO(ISO 1)", &from).unwrap();
        assert_eq!(
            to.get("ISO(ISO 1)").unwrap().as_deref(),
            Some("<bibitem>local</bibitem>")
        );
    }

    #[test]
    fn test_valid_entry_freshness() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        c.set("ISO(ISO 1)", Some("<bibitem><fetched>2024-05-01</fetched></bibitem>"))
            .unwrap();
        c.set("ISO(ISO 2)", Some("<bibitem><fetched>2024-01-01</fetched></bibitem>"))
            .unwrap();
        c.set("ISO(ISO 3)", Some("not_found 2024-03-01")).unwrap();

        assert!(c.valid_entry_on("ISO(ISO 1)", None, today).unwrap());
        assert!(!c.valid_entry_on("ISO(ISO 2)", None, today).unwrap());
        assert!(c.valid_entry_on("ISO(ISO 2)", Some("2014"), today).unwrap());
        assert!(!c.valid_entry_on("ISO(ISO 3)", None, today).unwrap());
        assert!(!c.valid_entry_on("ISO(ISO 4)", Some("2014"), today).unwrap());
    }

    #[test]
    fn test_fetched() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 3)", Some("not_found 2024-03-01")).unwrap();
        assert_eq!(
            c.fetched("ISO(ISO 3)").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(c.fetched("ISO(ISO 9)").unwrap(), None);
    }

    #[test]
    fn test_all_lists_records_only() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 2)", Some("<b>2</b>")).unwrap();
        c.set("ISO(ISO 1)", Some("<b>1</b>")).unwrap();
        c.set("ISO(ISO 3)", Some("not_found 2024-03-01")).unwrap();
        let contents: Vec<String> = c.all().unwrap().map(|r| r.unwrap().1).collect();
        assert_eq!(contents, vec!["<b>1</b>", "<b>2</b>"]);
    }

    #[test]
    fn test_check_version_wipes_mismatched_category() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 1)", Some("<bibitem/>")).unwrap();
        c.set("CN(GB 1)", Some("<bibitem/>")).unwrap();
        std::fs::write(tmp.path().join("cache/iso/version"), "old-grammar").unwrap();

        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(Arc::new(Registry::new())));
        let reopened = DbCache::open(tmp.path().join("cache"), storage).unwrap();
        assert_eq!(reopened.get("ISO(ISO 1)").unwrap(), None);
        assert!(reopened.get("CN(GB 1)").unwrap().is_some());
    }

    #[test]
    fn test_mv_and_refuse_existing_target() {
        let tmp = TempDir::new().unwrap();
        let c = cache(&tmp);
        c.set("ISO(ISO 1)", Some("<bibitem/>")).unwrap();

        let target = tmp.path().join("elsewhere");
        assert_eq!(c.mv(&target).unwrap(), Some(target.clone()));
        assert_eq!(c.dir(), target);
        assert!(c.get("ISO(ISO 1)").unwrap().is_some());

        let occupied = tmp.path().join("occupied");
        std::fs::create_dir_all(&occupied).unwrap();
        assert_eq!(c.mv(&occupied).unwrap(), None);
        assert_eq!(c.dir(), target);
    }
}
