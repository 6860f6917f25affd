//! Byte-level persistence behind the cache tiers.
//!
//! A storage key is a path without extension; the extension records which
//! kind of entry is stored there. Every category directory carries a
//! `version` file holding the grammar hash its entries were written with.
//!
//! The backend is chosen once per process from [`Settings`] and shared by
//! every tier.

mod file;
mod object;

pub use file::FileStorage;
pub use object::{MemoryObjectStore, ObjectStorage, ObjectStoreClient};

use crate::config::{CacheConfig, Settings, StorageMode};
use crate::error::{BibrefError, Result};
use crate::registry::Registry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extensions tried by [`Storage::get`], in order.
pub const LOOKUP_EXTENSIONS: [&str; 3] = [
    CacheConfig::RECORD_EXT,
    CacheConfig::NOT_FOUND_EXT,
    CacheConfig::REDIRECT_EXT,
];

/// Persistence contract shared by the filesystem and object-store backends.
pub trait Storage: Send + Sync {
    /// Write `value` at `key.ext`, creating `dir`'s version marker first if
    /// it is missing. Other extension variants of `key` are removed, since
    /// [`Storage::get`] would otherwise keep returning the one tried first.
    fn save(&self, dir: &Path, key: &Path, ext: &str, value: &str) -> Result<()>;

    /// Read the first of `key.xml`, `key.notfound`, `key.redirect` present.
    fn get(&self, key: &Path) -> Result<Option<String>>;

    /// Read a stored blob by full path.
    fn read(&self, path: &Path) -> Result<Option<String>>;

    /// Every `*.ext` blob under `dir`, recursively, sorted by path.
    fn list(&self, dir: &Path, ext: &str) -> Result<Vec<PathBuf>>;

    /// Remove every extension variant of `key`.
    fn delete(&self, key: &Path) -> Result<()>;

    /// True iff `dir/version` exists and equals the live grammar hash.
    fn check_version(&self, dir: &Path) -> Result<bool>;

    /// Immediate child directories of `dir`.
    fn subdirs(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Delete `dir` and everything under it. Missing dirs are not an error.
    fn remove_all(&self, dir: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> Result<bool>;

    /// Move a whole directory tree.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Lazy iterator over `(path, content)` pairs returned by [`all`].
pub struct AllEntries<'a> {
    storage: &'a dyn Storage,
    paths: std::vec::IntoIter<PathBuf>,
}

impl Iterator for AllEntries<'_> {
    type Item = Result<(PathBuf, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let path = self.paths.next()?;
            match self.storage.read(&path) {
                Ok(Some(content)) => return Some(Ok((path, content))),
                // Removed between listing and reading.
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Iterate every record blob under `dir`, reading each only when reached.
pub fn all<'a>(storage: &'a dyn Storage, dir: &Path) -> Result<AllEntries<'a>> {
    let paths = storage.list(dir, CacheConfig::RECORD_EXT)?;
    Ok(AllEntries {
        storage,
        paths: paths.into_iter(),
    })
}

/// Grammar category of a directory: its last path segment.
pub(crate) fn category(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `key.ext`, keeping any dots already in the key.
pub(crate) fn with_ext(key: &Path, ext: &str) -> PathBuf {
    let mut s = key.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Build the process-wide storage backend.
///
/// Object-store mode without an injected client falls back to the
/// in-memory store.
pub fn from_settings(
    settings: &Settings,
    registry: Arc<Registry>,
    client: Option<Arc<dyn ObjectStoreClient>>,
) -> Result<Arc<dyn Storage>> {
    match settings.storage {
        StorageMode::Filesystem => Ok(Arc::new(FileStorage::new(registry))),
        StorageMode::ObjectStore => {
            let bucket = settings
                .object_store_bucket
                .clone()
                .ok_or_else(|| BibrefError::Config {
                    message: "object_store mode requires a bucket".to_string(),
                })?;
            let client = client.unwrap_or_else(|| Arc::new(MemoryObjectStore::new()));
            Ok(Arc::new(ObjectStorage::new(client, bucket, registry)))
        }
    }
}
