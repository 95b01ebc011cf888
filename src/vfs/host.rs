//! Hierarchical filesystem handles owned by an interpreter.
//!
//! The virtual filesystem store is flat; interpreters see a tree. `HostFs`
//! is the small surface the mirror operations need: directory creation, file
//! write/read, directory listing and the filesystem's own directory test.

use crate::config::types::SandboxError;
use crate::vfs::path::normalize_path;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("File exists: {0}")]
    AlreadyExists(String),

    #[error("Path outside filesystem root: {0}")]
    OutsideRoot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FsResult<T> = std::result::Result<T, FsError>;

impl From<FsError> for SandboxError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::OutsideRoot(path) => SandboxError::PathTraversal(path),
            FsError::Io(e) => SandboxError::Io(e),
            other => SandboxError::Storage(other.to_string()),
        }
    }
}

/// Interpreter-side hierarchical filesystem
pub trait HostFs {
    /// Create one directory. The parent must already exist.
    fn mkdir(&mut self, path: &str) -> FsResult<()>;
    /// Create or truncate a file. The parent directory must already exist.
    fn write_file(&mut self, path: &str, content: &str) -> FsResult<()>;
    fn read_file(&self, path: &str) -> FsResult<String>;
    /// Entry names (not paths) directly under `path`
    fn readdir(&self, path: &str) -> FsResult<Vec<String>>;
    fn is_dir(&self, path: &str) -> bool;
}

#[derive(Debug, Clone)]
enum Node {
    Dir(BTreeMap<String, Node>),
    File(String),
}

/// In-memory hierarchical filesystem with Emscripten-like strictness:
/// writing into a missing directory fails.
#[derive(Debug, Clone)]
pub struct MemFs {
    root: Node,
}

impl Default for MemFs {
    fn default() -> Self {
        Self {
            root: Node::Dir(BTreeMap::new()),
        }
    }
}

fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file, creating missing parents. Convenience for seeding.
    pub fn insert_file(&mut self, path: &str, content: &str) -> FsResult<()> {
        let parts = split(path);
        let Some((name, dirs)) = parts.split_last() else {
            return Err(FsError::IsADirectory(path.to_string()));
        };
        let mut node = &mut self.root;
        for dir in dirs {
            let Node::Dir(children) = node else {
                return Err(FsError::NotADirectory(path.to_string()));
            };
            node = children
                .entry((*dir).to_string())
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
        }
        match node {
            Node::Dir(children) => {
                children.insert((*name).to_string(), Node::File(content.to_string()));
                Ok(())
            }
            Node::File(_) => Err(FsError::NotADirectory(path.to_string())),
        }
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        let _ = self.insert_file(path, content);
        self
    }

    fn lookup(&self, path: &str) -> Option<&Node> {
        let mut node = &self.root;
        for part in split(path) {
            match node {
                Node::Dir(children) => node = children.get(part)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    fn parent_children_mut(&mut self, path: &str) -> FsResult<(&mut BTreeMap<String, Node>, String)> {
        let parts = split(path);
        let Some((name, dirs)) = parts.split_last() else {
            return Err(FsError::AlreadyExists("/".to_string()));
        };
        let mut node = &mut self.root;
        for dir in dirs {
            match node {
                Node::Dir(children) => {
                    node = children
                        .get_mut(*dir)
                        .ok_or_else(|| FsError::NotFound(path.to_string()))?;
                }
                Node::File(_) => return Err(FsError::NotADirectory(path.to_string())),
            }
        }
        match node {
            Node::Dir(children) => Ok((children, (*name).to_string())),
            Node::File(_) => Err(FsError::NotADirectory(path.to_string())),
        }
    }
}

impl HostFs for MemFs {
    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        let (children, name) = self.parent_children_mut(path)?;
        if children.contains_key(&name) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        children.insert(name, Node::Dir(BTreeMap::new()));
        Ok(())
    }

    fn write_file(&mut self, path: &str, content: &str) -> FsResult<()> {
        let (children, name) = self.parent_children_mut(path)?;
        if let Some(Node::Dir(_)) = children.get(&name) {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        children.insert(name, Node::File(content.to_string()));
        Ok(())
    }

    fn read_file(&self, path: &str) -> FsResult<String> {
        match self.lookup(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(Node::Dir(_)) => Err(FsError::IsADirectory(path.to_string())),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        match self.lookup(path) {
            Some(Node::Dir(children)) => Ok(children.keys().cloned().collect()),
            Some(Node::File(_)) => Err(FsError::NotADirectory(path.to_string())),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some(Node::Dir(_)))
    }
}

/// Real directory exposed as an interpreter filesystem rooted at `root`.
///
/// Logical `/a/b.txt` maps to `<root>/a/b.txt`. Symlinks are never followed:
/// a path that passes through one is reported as outside the root.
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: PathBuf) -> FsResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> FsResult<PathBuf> {
        if split(path).is_empty() {
            return Ok(self.root.clone());
        }
        let normalized = normalize_path(path).map_err(|_| FsError::OutsideRoot(path.to_string()))?;
        let mut target = self.root.clone();
        for part in split(&normalized) {
            target.push(part);
            let is_link = fs::symlink_metadata(&target)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                log::warn!("dirfs: refusing symlink at {}", path);
                return Err(FsError::OutsideRoot(path.to_string()));
            }
        }
        Ok(target)
    }
}

fn map_io(path: &str, err: std::io::Error) -> FsError {
    match err.kind() {
        std::io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        std::io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Io(err),
    }
}

impl HostFs for DirFs {
    fn mkdir(&mut self, path: &str) -> FsResult<()> {
        let target = self.resolve(path)?;
        fs::create_dir(&target).map_err(|e| map_io(path, e))
    }

    fn write_file(&mut self, path: &str, content: &str) -> FsResult<()> {
        let target = self.resolve(path)?;
        if target.is_dir() {
            return Err(FsError::IsADirectory(path.to_string()));
        }
        fs::write(&target, content).map_err(|e| map_io(path, e))
    }

    fn read_file(&self, path: &str) -> FsResult<String> {
        let target = self.resolve(path)?;
        fs::read_to_string(&target).map_err(|e| map_io(path, e))
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let target = self.resolve(path)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&target).map_err(|e| map_io(path, e))? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    fn is_dir(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(target) => fs::symlink_metadata(&target)
                .map(|m| m.file_type().is_dir())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
