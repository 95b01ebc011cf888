//! Integration tests for the workspace store
//!
//! Persistence across reopen, and the mount -> run -> sync cycle against
//! both interpreter filesystem flavours.

use clipy::config::loader::SandboxConfig;
use clipy::vfs::{DirFs, FileStorage, HostFs, MemFs, VirtualFs};
use clipy::{FileTree, SandboxError};
use std::path::PathBuf;

fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("clipy-{}-{}", label, uuid::Uuid::new_v4()))
}

#[test]
fn test_workspace_survives_reopen() {
    let dir = scratch_dir("store");
    let config = SandboxConfig {
        storage_dir: dir.clone(),
        ..SandboxConfig::default()
    };

    {
        let mut vfs = VirtualFs::from_config(&config).unwrap();
        vfs.write("/main.py", "print('hi')").unwrap();
        vfs.write("lib/util.py", "X = 1").unwrap();
    }

    let vfs = VirtualFs::from_config(&config).unwrap();
    assert_eq!(vfs.read("/main.py"), Some("print('hi')"));
    assert_eq!(vfs.read("/lib/util.py"), Some("X = 1"));
    assert_eq!(vfs.directories(), vec!["/lib".to_string()]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_rejected_write_changes_nothing_on_disk() {
    let dir = scratch_dir("reject");
    let storage = FileStorage::new(dir.clone()).unwrap();
    let mut vfs = VirtualFs::open(Box::new(storage), "ws", "/main.py").unwrap();
    vfs.write("/a.txt", "a").unwrap();

    assert!(matches!(
        vfs.write("../../escape.txt", "x"),
        Err(SandboxError::PathTraversal(_))
    ));

    let reopened = VirtualFs::open(Box::new(FileStorage::new(dir.clone()).unwrap()), "ws", "/main.py").unwrap();
    assert_eq!(reopened.list(), vec!["/a.txt".to_string()]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_main_file_cannot_be_deleted() {
    let mut vfs = VirtualFs::in_memory();
    vfs.write("/main.py", "code").unwrap();
    assert!(!vfs.delete("/main.py").unwrap());
    assert_eq!(vfs.read("/main.py"), Some("code"));
}

#[test]
fn test_mount_then_sync_round_trip_in_memory() {
    let mut vfs = VirtualFs::in_memory();
    vfs.write("/main.py", "main").unwrap();
    vfs.write("/data/deep/nested/input.txt", "42").unwrap();

    let mut fs = MemFs::new();
    let report = vfs.mount_to_runtime(&mut fs);
    assert!(report.is_complete());
    assert!(fs.is_dir("/data/deep/nested"));

    // Program output at depth >= 2
    fs.mkdir("/out").unwrap();
    fs.mkdir("/out/run1").unwrap();
    fs.write_file("/out/run1/result.txt", "ok").unwrap();

    let sync = vfs.sync_from_runtime(&fs).unwrap();
    assert!(sync.skipped.is_empty());
    assert_eq!(vfs.read("/out/run1/result.txt"), Some("ok"));
    assert_eq!(vfs.read("/data/deep/nested/input.txt"), Some("42"));
}

#[test]
fn test_mount_then_sync_round_trip_on_disk() {
    let root = scratch_dir("dirfs");
    let mut vfs = VirtualFs::in_memory();
    let tree: FileTree = [
        ("/main.py".to_string(), "main".to_string()),
        ("/pkg/mod.py".to_string(), "x = 1".to_string()),
    ]
    .into();
    vfs.replace_all(tree.clone()).unwrap();

    let mut fs = DirFs::new(root.clone()).unwrap();
    assert!(vfs.mount_to_runtime(&mut fs).is_complete());
    assert_eq!(std::fs::read_to_string(root.join("pkg/mod.py")).unwrap(), "x = 1");

    let mut fresh = VirtualFs::in_memory();
    fresh.sync_from_runtime(&fs).unwrap();
    assert_eq!(fresh.files(), &tree);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn test_replace_all_is_all_or_nothing() {
    let mut vfs = VirtualFs::in_memory();
    vfs.write("/keep.txt", "k").unwrap();

    let bad: FileTree = [
        ("/fine.txt".to_string(), "f".to_string()),
        ("/../bad.txt".to_string(), "b".to_string()),
    ]
    .into();
    assert!(vfs.replace_all(bad).is_err());
    assert_eq!(vfs.list(), vec!["/keep.txt".to_string()]);
}

#[cfg(unix)]
#[test]
fn test_sync_skips_symlinks_out_of_the_session_dir() {
    let base = scratch_dir("links");
    let root = base.join("session");
    let fs = DirFs::new(root.clone()).unwrap();
    std::fs::write(base.join("secret.txt"), "TOP SECRET").unwrap();
    std::fs::write(root.join("main.py"), "print('hi')").unwrap();
    std::os::unix::fs::symlink(base.join("secret.txt"), root.join("link.txt")).unwrap();
    std::os::unix::fs::symlink(&base, root.join("up")).unwrap();

    let mut vfs = VirtualFs::in_memory();
    let report = vfs.sync_from_runtime(&fs).unwrap();
    assert_eq!(vfs.read("/main.py"), Some("print('hi')"));
    assert_eq!(vfs.read("/link.txt"), None);
    assert_eq!(vfs.read("/up/secret.txt"), None);
    assert!(report.skipped.iter().any(|(path, _)| path == "/link.txt"));

    let _ = std::fs::remove_dir_all(&base);
}
