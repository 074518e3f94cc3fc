//! Storage backends for the headless page

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;

use crate::error::{Error, Result};
use crate::guard::lock;

/// Key/value store backing one storage scope
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Stored non-empty value of `key`, storing `value` first when there is none
    fn get_or_insert(&self, key: &str, value: &str) -> Result<String> {
        if let Some(existing) = self.get(key)?.filter(|v| !v.is_empty()) {
            return Ok(existing);
        }
        self.set(key, value)?;
        Ok(value.to_string())
    }
}

/// In-memory storage; lives as long as the value does
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    unavailable: bool,
}

impl MemoryStorage {
    /// Storage that fails every access, like disabled or private-mode storage
    pub fn unavailable() -> Self {
        Self {
            entries: Mutex::default(),
            unavailable: true,
        }
    }

    fn check(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::Storage("storage is disabled".to_string()));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_or_insert(&self, key: &str, value: &str) -> Result<String> {
        self.check()?;
        let mut entries = lock(&self.entries);
        let entry = entries.entry(key.to_string()).or_default();
        if entry.is_empty() {
            *entry = value.to_string();
        }
        Ok(entry.clone())
    }
}

/// Durable storage in a JSON file
///
/// The file is re-read on every access so separate processes sharing it
/// see each other's writes. Writes hold an advisory lock on a sibling
/// `.lock` file and replace the data file by rename, so readers never see
/// a partial file and concurrent writers (threads or processes) serialize.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Storage(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!("corrupt storage file {}: {}", self.path.display(), e))
        })
    }

    /// Take the cross-process write lock; released when the file is dropped
    fn lock_exclusive(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_path = self.path.with_extension("json.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        FileExt::lock_exclusive(&file).map_err(|e| {
            Error::Storage(format!("failed to lock {}: {}", lock_path.display(), e))
        })?;
        Ok(file)
    }

    /// Must be called with the write lock held
    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _lock = self.lock_exclusive()?;
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn get_or_insert(&self, key: &str, value: &str) -> Result<String> {
        if let Some(existing) = self.get(key)?.filter(|v| !v.is_empty()) {
            return Ok(existing);
        }

        let _lock = self.lock_exclusive()?;
        let mut entries = self.load()?;
        if let Some(existing) = entries.get(key).filter(|v| !v.is_empty()) {
            return Ok(existing.clone());
        }
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)?;
        Ok(value.to_string())
    }
}
