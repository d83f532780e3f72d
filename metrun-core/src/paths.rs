//! Path helpers shared by the controller and pipeline loader

use std::path::{Component, Path, PathBuf};

/// Resolves `path` against `base` and normalises it lexically
///
/// `.` components are dropped and `..` pops the previous component; the
/// filesystem is never consulted, so the result need not exist.
pub fn absolutize(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_are_anchored() {
        let base = Path::new("/work/runs");
        assert_eq!(absolutize(base, "./apps/tool.pl"), PathBuf::from("/work/runs/apps/tool.pl"));
        assert_eq!(absolutize(base, "../db"), PathBuf::from("/work/db"));
        assert_eq!(absolutize(base, "proj1"), PathBuf::from("/work/runs/proj1"));
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let base = Path::new("/work");
        assert_eq!(absolutize(base, "/opt/./bin/x"), PathBuf::from("/opt/bin/x"));
    }
}
