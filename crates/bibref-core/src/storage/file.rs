//! Local filesystem storage.
//!
//! Writes take an exclusive advisory lock on the target file so that two
//! processes writing the same key never interleave bytes. The lock wait is
//! bounded; expiry surfaces as [`BibrefError::LockTimeout`].

use super::{category, with_ext, Storage, LOOKUP_EXTENSIONS};
use crate::config::CacheConfig;
use crate::error::{BibrefError, Result};
use crate::registry::Registry;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use walkdir::WalkDir;

pub struct FileStorage {
    registry: Arc<Registry>,
    lock_timeout: Duration,
}

impl FileStorage {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            lock_timeout: CacheConfig::LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn set_version(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| BibrefError::io_with_path(e, dir))?;
        let version = dir.join(CacheConfig::VERSION_FILE);
        if !version.exists() {
            let hash = self.registry.grammar_hash_for(&category(dir));
            self.locked_write(&version, &hash)?;
        }
        Ok(())
    }

    /// Open without truncating, lock, then replace the contents.
    fn locked_write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BibrefError::io_with_path(e, parent))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| BibrefError::io_with_path(e, path))?;

        acquire_lock(&file, path, self.lock_timeout)?;
        let written = write_locked(&mut file, content);
        let _ = FileExt::unlock(&file);
        written.map_err(|e| BibrefError::io_with_path(e, path))
    }
}

fn acquire_lock(file: &File, path: &Path, timeout: Duration) -> Result<()> {
    let started = Instant::now();
    let contended = fs2::lock_contended_error().raw_os_error();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == contended => {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(BibrefError::LockTimeout {
                        path: path.to_path_buf(),
                        waited,
                    });
                }
                std::thread::sleep(CacheConfig::LOCK_POLL_INTERVAL);
            }
            Err(e) => return Err(BibrefError::io_with_path(e, path)),
        }
    }
}

fn write_locked(file: &mut File, content: &str) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BibrefError::io_with_path(e, path)),
    }
}

fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BibrefError::io_with_path(e, path)),
    }
}

impl Storage for FileStorage {
    fn save(&self, dir: &Path, key: &Path, ext: &str, value: &str) -> Result<()> {
        self.set_version(dir)?;
        self.locked_write(&with_ext(key, ext), value)?;
        for other in LOOKUP_EXTENSIONS.iter().filter(|e| **e != ext) {
            remove_optional(&with_ext(key, other))?;
        }
        Ok(())
    }

    fn get(&self, key: &Path) -> Result<Option<String>> {
        for ext in LOOKUP_EXTENSIONS {
            if let Some(content) = read_optional(&with_ext(key, ext))? {
                return Ok(Some(content));
            }
        }
        Ok(None)
    }

    fn read(&self, path: &Path) -> Result<Option<String>> {
        read_optional(path)
    }

    fn list(&self, dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|x| x == ext))
            .map(|e| e.into_path())
            .collect();
        paths.sort();
        Ok(paths)
    }

    fn delete(&self, key: &Path) -> Result<()> {
        for ext in LOOKUP_EXTENSIONS {
            remove_optional(&with_ext(key, ext))?;
        }
        Ok(())
    }

    fn check_version(&self, dir: &Path) -> Result<bool> {
        let stored = read_optional(&dir.join(CacheConfig::VERSION_FILE))?;
        Ok(stored.is_some_and(|v| v.trim() == self.registry.grammar_hash_for(&category(dir))))
    }

    fn subdirs(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BibrefError::io_with_path(e, dir)),
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn remove_all(&self, dir: &Path) -> Result<()> {
        match fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BibrefError::io_with_path(e, dir)),
        }
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| BibrefError::io_with_path(e, parent))?;
        }
        fs::rename(from, to).map_err(|e| BibrefError::io_with_path(e, from))
    }
}
