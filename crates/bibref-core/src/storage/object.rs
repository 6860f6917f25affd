//! Object-store storage.
//!
//! Paths become object keys verbatim. Writes go straight to the store with
//! last-writer-wins semantics; directories exist only as key prefixes.

use super::{category, with_ext, Storage, LOOKUP_EXTENSIONS};
use crate::config::CacheConfig;
use crate::error::{BibrefError, Result};
use crate::registry::Registry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Minimal bucket client used by [`ObjectStorage`].
pub trait ObjectStoreClient: Send + Sync {
    fn put_object(&self, bucket: &str, key: &str, body: &str) -> Result<()>;

    /// `Ok(None)` when the key does not exist.
    fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>>;

    fn head_object(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, sorted.
    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}

/// In-process bucket store.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(
        &self,
        key: &str,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), String>>> {
        self.objects.lock().map_err(|_| BibrefError::Storage {
            key: key.to_string(),
            message: "object map lock poisoned".to_string(),
        })
    }
}

impl ObjectStoreClient for MemoryObjectStore {
    fn put_object(&self, bucket: &str, key: &str, body: &str) -> Result<()> {
        self.objects(key)?
            .insert((bucket.to_string(), key.to_string()), body.to_string());
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        Ok(self
            .objects(key)?
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<bool> {
        Ok(self
            .objects(key)?
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects(prefix)?
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects(key)?
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

pub struct ObjectStorage {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    registry: Arc<Registry>,
}

fn object_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn dir_prefix(dir: &Path) -> String {
    let mut prefix = object_key(dir);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

impl ObjectStorage {
    pub fn new(client: Arc<dyn ObjectStoreClient>, bucket: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            registry,
        }
    }

    fn set_version(&self, dir: &Path) -> Result<()> {
        let key = object_key(&dir.join(CacheConfig::VERSION_FILE));
        if !self.client.head_object(&self.bucket, &key)? {
            let hash = self.registry.grammar_hash_for(&category(dir));
            self.client.put_object(&self.bucket, &key, &hash)?;
        }
        Ok(())
    }
}

impl Storage for ObjectStorage {
    fn save(&self, dir: &Path, key: &Path, ext: &str, value: &str) -> Result<()> {
        self.set_version(dir)?;
        self.client
            .put_object(&self.bucket, &object_key(&with_ext(key, ext)), value)?;
        for other in LOOKUP_EXTENSIONS.iter().filter(|e| **e != ext) {
            let object = object_key(&with_ext(key, other));
            if self.client.head_object(&self.bucket, &object)? {
                self.client.delete_object(&self.bucket, &object)?;
            }
        }
        Ok(())
    }

    fn get(&self, key: &Path) -> Result<Option<String>> {
        for ext in LOOKUP_EXTENSIONS {
            if let Some(body) = self
                .client
                .get_object(&self.bucket, &object_key(&with_ext(key, ext)))?
            {
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    fn read(&self, path: &Path) -> Result<Option<String>> {
        self.client.get_object(&self.bucket, &object_key(path))
    }

    fn list(&self, dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
        let suffix = format!(".{}", ext);
        let mut keys: Vec<String> = self
            .client
            .list_objects(&self.bucket, &dir_prefix(dir))?
            .into_iter()
            .filter(|k| k.ends_with(&suffix))
            .collect();
        keys.sort();
        Ok(keys.into_iter().map(PathBuf::from).collect())
    }

    fn delete(&self, key: &Path) -> Result<()> {
        for ext in LOOKUP_EXTENSIONS {
            let object = object_key(&with_ext(key, ext));
            if self.client.head_object(&self.bucket, &object)? {
                self.client.delete_object(&self.bucket, &object)?;
                debug!("Removed object {}", object);
            }
        }
        Ok(())
    }

    fn check_version(&self, dir: &Path) -> Result<bool> {
        let stored = self
            .client
            .get_object(&self.bucket, &object_key(&dir.join(CacheConfig::VERSION_FILE)))?;
        Ok(stored.is_some_and(|v| v.trim() == self.registry.grammar_hash_for(&category(dir))))
    }

    fn subdirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let prefix = dir_prefix(dir);
        let names: BTreeSet<String> = self
            .client
            .list_objects(&self.bucket, &prefix)?
            .iter()
            .filter_map(|k| {
                let rest = &k[prefix.len()..];
                rest.split_once('/').map(|(name, _)| name.to_string())
            })
            .collect();
        Ok(names.into_iter().map(|n| dir.join(n)).collect())
    }

    fn remove_all(&self, dir: &Path) -> Result<()> {
        for key in self.client.list_objects(&self.bucket, &dir_prefix(dir))? {
            self.client.delete_object(&self.bucket, &key)?;
        }
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        if self.client.head_object(&self.bucket, &object_key(path))? {
            return Ok(true);
        }
        Ok(!self
            .client
            .list_objects(&self.bucket, &dir_prefix(path))?
            .is_empty())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_prefix = dir_prefix(from);
        let to_prefix = dir_prefix(to);
        for key in self.client.list_objects(&self.bucket, &from_prefix)? {
            let body = self
                .client
                .get_object(&self.bucket, &key)?
                .ok_or_else(|| BibrefError::Storage {
                    key: key.clone(),
                    message: "object vanished during rename".to_string(),
                })?;
            let target = format!("{}{}", to_prefix, &key[from_prefix.len()..]);
            self.client.put_object(&self.bucket, &target, &body)?;
            self.client.delete_object(&self.bucket, &key)?;
        }
        Ok(())
    }
}
