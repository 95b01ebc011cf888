/// Persistent key -> blob storage backing the virtual filesystem
use crate::config::types::{Result, SandboxError};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Key/value blob store. One key holds the whole serialized file tree.
pub trait StorageBackend: Send {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn store(&mut self, key: &str, blob: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// In-memory storage. Clones share the same underlying map so a test can
/// inspect what a `VirtualFs` persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key before handing the storage to a store
    pub fn with_entry(self, key: &str, blob: &str) -> Self {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), blob.to_string());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok().and_then(|e| e.get(key).cloned())
    }
}

impl StorageBackend for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| SandboxError::Storage("memory storage lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, blob: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SandboxError::Storage("memory storage lock poisoned".to_string()))?;
        entries.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| SandboxError::Storage("memory storage lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed storage: each key is `<dir>/<key>.json`.
///
/// Writes go to a temp file that is renamed over the target, so a reader
/// never observes a half-written tree.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| {
            SandboxError::Storage(format!(
                "Failed to create storage directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StorageBackend for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SandboxError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn store(&mut self, key: &str, blob: &str) -> Result<()> {
        let path = self.key_path(key);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4()));

        fs::write(&tmp, blob).map_err(|e| {
            SandboxError::Storage(format!("Failed to write {}: {}", tmp.display(), e))
        })?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(SandboxError::Storage(format!(
                "Failed to replace {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
