//! Logical path normalization for the virtual filesystem.
//!
//! Every stored key is absolute (`/`-prefixed) with no empty, `.` or `..`
//! segments. A `..` that would climb above the root is a traversal.

use crate::config::types::{Result, SandboxError};

/// Normalize a learner-supplied path to its canonical absolute form.
///
/// `foo.txt`, `/foo.txt` and `//./foo.txt` all resolve to `/foo.txt`.
/// Backslashes are treated as separators.
pub fn normalize_path(raw: &str) -> Result<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in raw.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(SandboxError::PathTraversal(raw.to_string()));
                }
            }
            other => {
                if other.contains('\0') {
                    return Err(SandboxError::InvalidPath(raw.to_string()));
                }
                segments.push(other);
            }
        }
    }

    if segments.is_empty() {
        return Err(SandboxError::InvalidPath(format!(
            "'{}' does not name a file",
            raw
        )));
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Parent directories of a normalized path, outermost first.
///
/// `/a/b/c.txt` yields `["/a", "/a/b"]`.
pub fn parent_dirs(path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let trimmed = path.trim_start_matches('/');
    let mut current = String::new();
    let mut parts: Vec<&str> = trimmed.split('/').collect();
    parts.pop();
    for part in parts {
        current.push('/');
        current.push_str(part);
        dirs.push(current.clone());
    }
    dirs
}

/// Join a directory and a child entry name into an absolute path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" || dir.is_empty() {
        format!("/{}", name.trim_start_matches('/'))
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_slash_optional() {
        assert_eq!(normalize_path("foo.txt").unwrap(), "/foo.txt");
        assert_eq!(normalize_path("/foo.txt").unwrap(), "/foo.txt");
        assert_eq!(normalize_path("dir/bar.txt").unwrap(), "/dir/bar.txt");
    }

    #[test]
    fn test_dot_segments_collapse() {
        assert_eq!(normalize_path("//a/./b//c.txt").unwrap(), "/a/b/c.txt");
        assert_eq!(normalize_path("/a/b/../c.txt").unwrap(), "/a/c.txt");
        assert_eq!(normalize_path("a\\b.txt").unwrap(), "/a/b.txt");
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(matches!(
            normalize_path("../evil.txt"),
            Err(SandboxError::PathTraversal(_))
        ));
        assert!(matches!(
            normalize_path("/a/../../etc/passwd"),
            Err(SandboxError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_root_is_not_a_file() {
        assert!(matches!(normalize_path("/"), Err(SandboxError::InvalidPath(_))));
        assert!(matches!(normalize_path(""), Err(SandboxError::InvalidPath(_))));
        assert!(matches!(normalize_path("/a/.."), Err(SandboxError::InvalidPath(_))));
    }

    #[test]
    fn test_parent_dirs() {
        assert_eq!(parent_dirs("/a/b/c.txt"), vec!["/a".to_string(), "/a/b".to_string()]);
        assert!(parent_dirs("/top.txt").is_empty());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(join("/dir1", "sub"), "/dir1/sub");
    }
}
