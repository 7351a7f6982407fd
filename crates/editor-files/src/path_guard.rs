//! Path containment checks and the lexical path helpers the endpoints share.
//!
//! `is_safe` compares raw path bytes, so `/srv/data2` counts as inside
//! `/srv/data`. Callers that need component-wise containment should compare
//! with `Path::starts_with` instead.

use std::path::{Component, Path, PathBuf, is_separator};

use tracing::warn;

use crate::error::FileServerError;

/// Check that `candidate` stays within `base_dir`.
///
/// With no base directory configured every path is accepted. With
/// `follow_symlinks` the candidate is resolved through symlinks before the
/// prefix check; otherwise only `.` and `..` segments are collapsed.
pub fn is_safe(base_dir: Option<&Path>, candidate: &Path, follow_symlinks: bool) -> bool {
    let Some(base_dir) = base_dir else {
        return true;
    };

    let base = realpath(base_dir);
    let resolved = if follow_symlinks {
        realpath(candidate)
    } else {
        absolutize(candidate)
    };

    resolved
        .as_os_str()
        .as_encoded_bytes()
        .starts_with(base.as_os_str().as_encoded_bytes())
}

/// `is_safe` with symlinks followed, as an error for the request handlers.
pub fn ensure_safe(base_dir: Option<&Path>, candidate: &Path) -> Result<(), FileServerError> {
    if is_safe(base_dir, candidate, true) {
        Ok(())
    } else {
        warn!("Rejected path outside base directory: {}", candidate.display());
        Err(FileServerError::PathTraversal(candidate.display().to_string()))
    }
}

/// Make `path` absolute against the working directory and collapse `.`/`..`
/// without touching symlinks.
pub fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    normalize_lexical(&joined)
}

/// Resolve symlinks for the longest existing prefix of `path`, then append the
/// remaining segments lexically. Works for paths that do not exist yet.
pub fn realpath(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return normalize_lexical(path),
        }
    };

    let components: Vec<Component<'_>> = absolute.components().collect();
    for split in (1..components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        if let Ok(canonical) = prefix.canonicalize() {
            let rest: PathBuf = components[split..].iter().collect();
            return normalize_lexical(&canonical.join(rest));
        }
    }

    normalize_lexical(&absolute)
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => result.push(prefix.as_os_str()),
            Component::RootDir => result.push(component.as_os_str()),
            Component::CurDir => continue,
            Component::ParentDir => {
                // Never climb above the root.
                if result.file_name().is_some() {
                    result.pop();
                } else if !result.has_root() {
                    result.push("..");
                }
            }
            Component::Normal(name) => result.push(name),
        }
    }
    if result.as_os_str().is_empty() {
        result.push(".");
    }
    result
}

/// Directory part of a path string, trailing separators trimmed unless the
/// whole head is separators (`"/a/b/"` -> `"/a/b"`, `"/a"` -> `"/"`).
pub fn dirname(path: &str) -> &str {
    let split = path.rfind(is_separator).map_or(0, |i| i + 1);
    let head = &path[..split];
    if !head.is_empty() && !head.chars().all(is_separator) {
        head.trim_end_matches(is_separator)
    } else {
        head
    }
}

/// Final segment of a path string; empty when the path ends in a separator.
pub fn basename(path: &str) -> &str {
    let split = path.rfind(is_separator).map_or(0, |i| i + 1);
    &path[split..]
}

/// Destination for renaming `src` in place: its directory part joined with
/// `new_name`.
pub fn rename_target(src: &str, new_name: &str) -> String {
    let head = &src[..src.len() - basename(src).len()];
    format!("{head}{new_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_safe_without_base_accepts_everything() {
        assert!(is_safe(None, Path::new("/etc/passwd"), true));
        assert!(is_safe(None, Path::new("../../x"), false));
    }

    #[test]
    fn test_is_safe_inside_and_outside() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/file.txt"), "x").unwrap();

        for follow in [true, false] {
            assert!(is_safe(Some(root), &root.join("sub/file.txt"), follow));
            assert!(is_safe(Some(root), &root.join("sub/missing.txt"), follow));
            assert!(!is_safe(Some(root), &root.join("../"), follow));
            assert!(!is_safe(Some(root), &root.join("sub/../../etc"), follow));
            assert!(!is_safe(Some(root), Path::new("/"), follow));
        }
    }

    #[test]
    fn test_is_safe_symlink_escape() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::symlink;
            symlink(outside.path(), root.join("escape")).unwrap();

            let candidate = root.join("escape/secret.txt");
            assert!(!is_safe(Some(&root), &candidate, true));
            // Lexically the link lives inside the base.
            assert!(is_safe(Some(&root), &candidate, false));
        }
    }

    #[test]
    fn test_is_safe_is_a_byte_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let base = root.join("data");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::create_dir_all(root.join("data2")).unwrap();

        assert!(is_safe(Some(&base), &root.join("data2"), true));
        assert!(!is_safe(Some(&base), &root.join("dat"), true));
    }

    #[test]
    fn test_ensure_safe_maps_to_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = ensure_safe(Some(temp_dir.path()), Path::new("/"));
        assert!(matches!(result, Err(FileServerError::PathTraversal(_))));
    }

    #[test]
    fn test_absolutize_collapses_dots() {
        assert_eq!(absolutize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(absolutize(Path::new("/../..")), PathBuf::from("/"));
        assert!(absolutize(Path::new("rel")).is_absolute());
    }

    #[test]
    fn test_dirname_and_basename() {
        assert_eq!(dirname("/a/b/c.txt"), "/a/b");
        assert_eq!(dirname("/a/b/"), "/a/b");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("file"), "");
        assert_eq!(basename("/a/b/c.txt"), "c.txt");
        assert_eq!(basename("/a/b/"), "");
    }

    #[test]
    fn test_rename_target() {
        assert_eq!(rename_target("/a/b/old.txt", "new.txt"), "/a/b/new.txt");
        assert_eq!(rename_target("old.txt", "new.txt"), "new.txt");
        assert_eq!(rename_target("/a/b/b", "c"), "/a/b/c");
    }
}
