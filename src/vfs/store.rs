//! Persistent flat file store.
//!
//! `VirtualFs` owns the learner's workspace: a flat map of absolute paths to
//! text content, persisted as one JSON object under one storage key. Every
//! mutation builds the candidate tree, persists it, and only then commits it
//! in memory, so a rejected path or a failed store leaves the workspace
//! exactly as it was.

use crate::config::loader::{SandboxConfig, DEFAULT_MAIN_FILE, DEFAULT_STORAGE_KEY};
use crate::config::types::{FileTree, Result, SandboxError};
use crate::observability::audit::events;
use crate::vfs::host::HostFs;
use crate::vfs::mirror::{collect_tree, directory_index, mount_tree, MountReport, SyncReport};
use crate::vfs::path::normalize_path;
use crate::vfs::storage::{FileStorage, MemoryStorage, StorageBackend};

pub struct VirtualFs {
    storage: Box<dyn StorageBackend>,
    key: String,
    main_file: String,
    files: FileTree,
}

impl std::fmt::Debug for VirtualFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFs")
            .field("key", &self.key)
            .field("main_file", &self.main_file)
            .field("files", &self.files.len())
            .finish()
    }
}

impl VirtualFs {
    /// Open the store persisted under `key`. A missing key is an empty
    /// workspace; an unparseable blob is logged and also treated as empty.
    pub fn open(storage: Box<dyn StorageBackend>, key: &str, main_file: &str) -> Result<Self> {
        let main_file = normalize_path(main_file)?;
        let files = match storage.load(key)? {
            Some(blob) => match serde_json::from_str::<FileTree>(&blob) {
                Ok(tree) => sanitize_loaded(tree),
                Err(e) => {
                    log::warn!("vfs: stored tree under '{}' is corrupt, starting empty: {}", key, e);
                    FileTree::new()
                }
            },
            None => FileTree::new(),
        };

        log::debug!("vfs: opened '{}' with {} files", key, files.len());
        Ok(Self {
            storage,
            key: key.to_string(),
            main_file,
            files,
        })
    }

    /// Workspace persisted on disk at the configured location
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let storage = FileStorage::new(config.storage_dir.clone())?;
        Self::open(Box::new(storage), &config.storage_key, &config.main_file)
    }

    /// Non-persistent workspace with default key and main file
    pub fn in_memory() -> Self {
        Self {
            storage: Box::new(MemoryStorage::new()),
            key: DEFAULT_STORAGE_KEY.to_string(),
            main_file: DEFAULT_MAIN_FILE.to_string(),
            files: FileTree::new(),
        }
    }

    pub fn main_file(&self) -> &str {
        &self.main_file
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// Store `content` at `path`, returning the normalized key.
    pub fn write(&mut self, path: &str, content: &str) -> Result<String> {
        let key = self.resolve(path)?;
        let mut candidate = self.files.clone();
        candidate.insert(key.clone(), content.to_string());
        self.commit(candidate)?;
        Ok(key)
    }

    /// Content at `path`, or `None` when absent. Never errors.
    pub fn read(&self, path: &str) -> Option<&str> {
        let key = normalize_path(path).ok()?;
        self.files.get(&key).map(String::as_str)
    }

    /// Remove `path`. Deleting the main file is accepted and ignored.
    ///
    /// Returns whether an entry was removed.
    pub fn delete(&mut self, path: &str) -> Result<bool> {
        let key = self.resolve(path)?;
        if key == self.main_file {
            log::debug!("vfs: ignoring delete of protected {}", key);
            return Ok(false);
        }
        if !self.files.contains_key(&key) {
            return Ok(false);
        }
        let mut candidate = self.files.clone();
        candidate.remove(&key);
        self.commit(candidate)?;
        Ok(true)
    }

    /// Every stored path, lexicographically ordered
    pub fn list(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    /// Directories implied by stored paths, parents first
    pub fn directories(&self) -> Vec<String> {
        directory_index(&self.files)
    }

    pub fn files(&self) -> &FileTree {
        &self.files
    }

    /// Copy of the current tree
    pub fn snapshot(&self) -> FileTree {
        self.files.clone()
    }

    /// Replace the whole workspace at once. Every path is validated before
    /// anything changes; one bad path rejects the whole tree.
    pub fn replace_all(&mut self, tree: FileTree) -> Result<()> {
        let mut candidate = FileTree::new();
        for (path, content) in tree {
            let key = self.resolve(&path)?;
            candidate.insert(key, content);
        }
        self.commit(candidate)?;
        log::info!("vfs: workspace replaced ({} files)", self.files.len());
        Ok(())
    }

    /// Mirror every stored file into an interpreter filesystem
    pub fn mount_to_runtime(&self, fs: &mut dyn HostFs) -> MountReport {
        let report = mount_tree(&self.files, fs);
        log::debug!(
            "vfs: mounted {} files ({} failed)",
            report.written.len(),
            report.failed.len()
        );
        report
    }

    /// Walk an interpreter filesystem and fold every file back into the store
    pub fn sync_from_runtime(&mut self, fs: &dyn HostFs) -> Result<SyncReport> {
        let (tree, mut report) = collect_tree(fs);
        let merged = self.apply_synced(tree)?;
        report.skipped.extend(merged.skipped);
        report.collected = merged.collected;
        Ok(report)
    }

    /// Merge a tree collected from an interpreter. Existing entries are
    /// overwritten; entries absent from `tree` are kept. Out-of-root names
    /// are skipped, not fatal. Persists once.
    pub fn apply_synced(&mut self, tree: FileTree) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut candidate = self.files.clone();
        for (path, content) in tree {
            match self.resolve(&path) {
                Ok(key) => {
                    report.collected.push(key.clone());
                    candidate.insert(key, content);
                }
                Err(e) => report.skipped.push((path, e.to_string())),
            }
        }
        if candidate != self.files {
            self.commit(candidate)?;
        }
        Ok(report)
    }

    fn resolve(&self, path: &str) -> Result<String> {
        normalize_path(path).map_err(|e| {
            if let SandboxError::PathTraversal(p) = &e {
                events::path_traversal_attempt(p.clone());
            }
            e
        })
    }

    fn commit(&mut self, candidate: FileTree) -> Result<()> {
        let blob = serde_json::to_string(&candidate)?;
        if let Err(e) = self.storage.store(&self.key, &blob) {
            events::storage_failure(&self.key, e.to_string());
            return Err(e);
        }
        self.files = candidate;
        Ok(())
    }
}

/// Drop stored keys that no longer normalize, normalizing the rest
fn sanitize_loaded(tree: FileTree) -> FileTree {
    let mut clean = FileTree::new();
    for (path, content) in tree {
        match normalize_path(&path) {
            Ok(key) => {
                clean.insert(key, content);
            }
            Err(e) => log::warn!("vfs: dropping stored entry '{}': {}", path, e),
        }
    }
    clean
}
