use std::fs;
use std::path::{Path, PathBuf};

use crate::EnvError;

/// Characters rejected in the final component of a tool directory.
pub const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

/// Advisory check that `path` names a directory that exists or could be
/// created: the path, its parent, or its grandparent must exist.
pub fn validate_path(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if path.to_string_lossy().trim().is_empty() {
        return false;
    }
    if let Some(name) = path.file_name() {
        if name.to_string_lossy().contains(FORBIDDEN_NAME_CHARS) {
            return false;
        }
    }
    if path.exists() {
        return true;
    }
    let Some(parent) = path.parent() else {
        return false;
    };
    if parent.as_os_str().is_empty() || parent.exists() {
        return true;
    }
    parent
        .parent()
        .is_some_and(|grandparent| grandparent.as_os_str().is_empty() || grandparent.exists())
}

/// Creates `path` and any missing ancestors.
pub fn ensure_directory(path: impl AsRef<Path>) -> Result<PathBuf, EnvError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(EnvError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty path"),
        });
    }
    fs::create_dir_all(path).map_err(|source| EnvError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn rejects_empty_and_forbidden_names() {
        let dir = tempdir().unwrap();
        assert!(!validate_path(""));
        assert!(!validate_path("   "));
        assert!(!validate_path(dir.path().join("node|20")));
        assert!(!validate_path(dir.path().join("what?")));
        assert!(!validate_path(dir.path().join("jdk*")));
    }

    #[test]
    fn accepts_existing_or_creatable_paths() {
        let dir = tempdir().unwrap();
        assert!(validate_path(dir.path()));
        assert!(validate_path(dir.path().join("nodejs")));
        assert!(validate_path(dir.path().join("tools").join("nodejs")));
        assert!(!validate_path(
            dir.path().join("a").join("b").join("c").join("nodejs")
        ));
    }

    #[test]
    fn ensure_directory_creates_ancestors() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("sdk").join("java").join("21");
        let created = ensure_directory(&target).unwrap();
        assert!(created.is_dir());
        assert!(ensure_directory(&target).is_ok());
        assert!(ensure_directory("").is_err());
    }
}
