/// Workspace state selection for grading
use crate::config::types::{FileTree, Result};
use crate::judge::case::{SourceKind, TestCase};
use crate::vfs::path::normalize_path;
use crate::vfs::VirtualFs;

/// Files and entry code a test is graded against
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSource {
    pub kind: SourceKind,
    /// Files mounted into the session, test setup files included
    pub files: FileTree,
    /// Code handed to the transformer
    pub code: String,
}

/// Pick what a test grades.
///
/// Pinned code wins. Otherwise the live workspace is graded, unless the test
/// asks for the snapshot and one was taken. Setup files are layered on top
/// and may overwrite workspace files for the duration of the test.
pub fn select_source(
    test: &TestCase,
    live: &VirtualFs,
    snapshot: Option<&FileTree>,
) -> Result<SelectedSource> {
    let main_file = live.main_file();

    let (kind, mut files) = if test.use_snapshot {
        match snapshot {
            Some(tree) => (SourceKind::Snapshot, tree.clone()),
            None => {
                log::warn!(
                    "judge: test {} requested a snapshot but none was taken, grading live workspace",
                    test.id
                );
                (SourceKind::Live, live.snapshot())
            }
        }
    } else {
        (SourceKind::Live, live.snapshot())
    };

    if let Some(setup) = &test.setup {
        for (path, content) in setup {
            files.insert(normalize_path(path)?, content.clone());
        }
    }

    let (kind, code) = match &test.code {
        Some(pinned) => (SourceKind::Pinned, pinned.clone()),
        None => (kind, files.get(main_file).cloned().unwrap_or_default()),
    };

    Ok(SelectedSource { kind, files, code })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SandboxError;

    fn workspace(main: &str) -> VirtualFs {
        let mut vfs = VirtualFs::in_memory();
        vfs.write("/main.py", main).unwrap();
        vfs
    }

    #[test]
    fn test_live_workspace_by_default() {
        let snapshot: FileTree = [("/main.py".to_string(), "old".to_string())].into();
        let live = workspace("new");
        let selected = select_source(&TestCase::execution("t"), &live, Some(&snapshot)).unwrap();
        assert_eq!(selected.kind, SourceKind::Live);
        assert_eq!(selected.code, "new");
    }

    #[test]
    fn test_snapshot_only_on_request() {
        let snapshot: FileTree = [("/main.py".to_string(), "old".to_string())].into();
        let live = workspace("new");
        let test = TestCase::execution("t").with_snapshot();

        let selected = select_source(&test, &live, Some(&snapshot)).unwrap();
        assert_eq!(selected.kind, SourceKind::Snapshot);
        assert_eq!(selected.code, "old");

        let fallback = select_source(&test, &live, None).unwrap();
        assert_eq!(fallback.kind, SourceKind::Live);
        assert_eq!(fallback.code, "new");
    }

    #[test]
    fn test_pinned_code_and_setup_files() {
        let live = workspace("ignored");
        let mut test = TestCase::execution("t").with_code("print pinned");
        test.setup = Some([("data/in.txt".to_string(), "42".to_string())].into());

        let selected = select_source(&test, &live, None).unwrap();
        assert_eq!(selected.kind, SourceKind::Pinned);
        assert_eq!(selected.code, "print pinned");
        assert_eq!(selected.files.get("/data/in.txt").map(String::as_str), Some("42"));
        assert_eq!(selected.files.get("/main.py").map(String::as_str), Some("ignored"));
    }

    #[test]
    fn test_setup_traversal_rejected() {
        let live = workspace("x");
        let mut test = TestCase::execution("t");
        test.setup = Some([("../etc/passwd".to_string(), "x".to_string())].into());
        assert!(matches!(
            select_source(&test, &live, None),
            Err(SandboxError::PathTraversal(_))
        ));
    }
}
