/// Mirroring between the flat file tree and an interpreter filesystem
use crate::config::types::FileTree;
use crate::vfs::host::{FsError, HostFs};
use crate::vfs::path::{join, normalize_path, parent_dirs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Interpreter-owned directories that are never synced back
pub const RUNTIME_SYSTEM_DIRS: &[&str] = &["/dev", "/proc", "/sys"];

/// Recursion guard for pathological trees
const MAX_WALK_DEPTH: usize = 64;

/// Outcome of mirroring a tree into an interpreter filesystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountReport {
    pub created_dirs: Vec<String>,
    pub written: Vec<String>,
    /// (path, error) for files the target filesystem refused
    pub failed: Vec<(String, String)>,
}

impl MountReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of walking an interpreter filesystem
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub collected: Vec<String>,
    /// (path, reason) for entries that could not be read or named
    pub skipped: Vec<(String, String)>,
}

/// Directories implied by the stored paths, derived on demand.
///
/// Ordered by depth, then name, so every parent precedes its children.
pub fn directory_index(tree: &FileTree) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for path in tree.keys() {
        for dir in parent_dirs(path) {
            dirs.insert(dir);
        }
    }
    let mut ordered: Vec<String> = dirs.into_iter().collect();
    ordered.sort_by(|a, b| {
        a.matches('/')
            .count()
            .cmp(&b.matches('/').count())
            .then_with(|| a.cmp(b))
    });
    ordered
}

/// Write every file of `tree` into `fs`, creating parent directories first.
///
/// A file the target refuses is recorded and the mount continues.
pub fn mount_tree(tree: &FileTree, fs: &mut dyn HostFs) -> MountReport {
    let mut report = MountReport::default();

    for dir in directory_index(tree) {
        if fs.is_dir(&dir) {
            continue;
        }
        match fs.mkdir(&dir) {
            Ok(()) => report.created_dirs.push(dir),
            Err(FsError::AlreadyExists(_)) => {}
            Err(e) => {
                // Files under this directory fail individually below
                log::warn!("mount: failed to create directory {}: {}", dir, e);
            }
        }
    }

    for (path, content) in tree {
        match fs.write_file(path, content) {
            Ok(()) => report.written.push(path.clone()),
            Err(e) => {
                log::warn!("mount: failed to write {}: {}", path, e);
                report.failed.push((path.clone(), e.to_string()));
            }
        }
    }

    report
}

/// Walk `fs` from its root and flatten every file into a tree keyed by
/// absolute path. Directory classification uses the filesystem's own
/// `is_dir`; unreadable entries are skipped and reported.
pub fn collect_tree(fs: &dyn HostFs) -> (FileTree, SyncReport) {
    let mut tree = FileTree::new();
    let mut report = SyncReport::default();
    walk(fs, "/", 0, &mut tree, &mut report);
    (tree, report)
}

fn walk(fs: &dyn HostFs, dir: &str, depth: usize, tree: &mut FileTree, report: &mut SyncReport) {
    if depth > MAX_WALK_DEPTH {
        report
            .skipped
            .push((dir.to_string(), "maximum directory depth exceeded".to_string()));
        return;
    }

    let entries = match fs.readdir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.skipped.push((dir.to_string(), e.to_string()));
            return;
        }
    };

    for name in entries {
        if name.is_empty() || name == "." || name == ".." {
            continue;
        }
        let full = join(dir, &name);
        if RUNTIME_SYSTEM_DIRS.contains(&full.as_str()) {
            continue;
        }

        if fs.is_dir(&full) {
            walk(fs, &full, depth + 1, tree, report);
            continue;
        }

        let key = match normalize_path(&full) {
            Ok(key) => key,
            Err(e) => {
                report.skipped.push((full, e.to_string()));
                continue;
            }
        };
        match fs.read_file(&full) {
            Ok(content) => {
                report.collected.push(key.clone());
                tree.insert(key, content);
            }
            Err(e) => {
                log::debug!("sync: skipping unreadable {}: {}", full, e);
                report.skipped.push((full, e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::host::{FsResult, MemFs};

    fn tree(entries: &[(&str, &str)]) -> FileTree {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn test_directory_index_parents_first() {
        let t = tree(&[("/z/y/x.txt", "1"), ("/a.txt", "2"), ("/z/w.txt", "3")]);
        assert_eq!(directory_index(&t), vec!["/z".to_string(), "/z/y".to_string()]);
    }

    #[test]
    fn test_mount_creates_parents_before_children() {
        let t = tree(&[("/a.txt", "A"), ("/sub/deep/b.txt", "B")]);
        let mut memfs = MemFs::new();
        let report = mount_tree(&t, &mut memfs);
        assert!(report.is_complete());
        assert_eq!(report.created_dirs, vec!["/sub", "/sub/deep"]);
        assert_eq!(memfs.read_file("/sub/deep/b.txt").unwrap(), "B");
    }

    #[test]
    fn test_mount_is_idempotent_over_existing_dirs() {
        let t = tree(&[("/sub/b.txt", "B")]);
        let mut memfs = MemFs::new();
        mount_tree(&t, &mut memfs);
        let second = mount_tree(&t, &mut memfs);
        assert!(second.is_complete());
        assert!(second.created_dirs.is_empty());
    }

    struct RefusingFs {
        inner: MemFs,
    }

    impl HostFs for RefusingFs {
        fn mkdir(&mut self, path: &str) -> FsResult<()> {
            self.inner.mkdir(path)
        }
        fn write_file(&mut self, path: &str, content: &str) -> FsResult<()> {
            if path == "/bad.txt" {
                return Err(FsError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "write fail",
                )));
            }
            self.inner.write_file(path, content)
        }
        fn read_file(&self, path: &str) -> FsResult<String> {
            if path == "/bad-sync.txt" {
                return Err(FsError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "read fail",
                )));
            }
            self.inner.read_file(path)
        }
        fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
            self.inner.readdir(path)
        }
        fn is_dir(&self, path: &str) -> bool {
            self.inner.is_dir(path)
        }
    }

    #[test]
    fn test_mount_continues_after_write_failure() {
        let t = tree(&[("/bad.txt", "BAD"), ("/ok.txt", "OK")]);
        let mut fs = RefusingFs { inner: MemFs::new() };
        let report = mount_tree(&t, &mut fs);
        assert_eq!(report.written, vec!["/ok.txt"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "/bad.txt");
        assert_eq!(fs.inner.read_file("/ok.txt").unwrap(), "OK");
    }

    #[test]
    fn test_collect_skips_unreadable() {
        let fs = RefusingFs {
            inner: MemFs::new()
                .with_file("/ok-sync.txt", "SYNC")
                .with_file("/bad-sync.txt", "X"),
        };
        let (collected, report) = collect_tree(&fs);
        assert_eq!(collected.get("/ok-sync.txt").map(String::as_str), Some("SYNC"));
        assert!(!collected.contains_key("/bad-sync.txt"));
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn test_collect_flattens_nested_and_skips_system_dirs() {
        let memfs = MemFs::new()
            .with_file("/top.txt", "TOP")
            .with_file("/dir1/file1.txt", "F1")
            .with_file("/dir1/sub/file2.txt", "F2")
            .with_file("/dev/null", "");
        let (collected, _) = collect_tree(&memfs);
        assert_eq!(
            collected.keys().cloned().collect::<Vec<_>>(),
            vec!["/dir1/file1.txt", "/dir1/sub/file2.txt", "/top.txt"]
        );
    }
}
