//! `SessionDirectoryAllocator` — deterministic mapping from session name to
//! a filesystem path under a configured root, with creation-on-demand and
//! collision avoidance.

use std::path::{Path, PathBuf};

use crate::errors::WorkdirError;

/// Allocates per-session working directories under a fixed root.
pub struct SessionDirectoryAllocator {
    root: PathBuf,
}

impl SessionDirectoryAllocator {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns `root/<sanitized-name>`, creating it (mode 0o755) if it does
    /// not exist. Errors if the path exists and is a file.
    pub fn allocate(&self, name: &str) -> Result<PathBuf, WorkdirError> {
        let sanitized = sanitize(name);
        let path = self.root.join(sanitized);

        if path.is_file() {
            return Err(WorkdirError::NotADirectory(path.display().to_string()));
        }
        if !path.exists() {
            std::fs::create_dir_all(&path)
                .map_err(|e| WorkdirError::CreateFailed(e.to_string()))?;
            set_permissions(&path)?;
        }
        Ok(path)
    }

    /// Accept a caller-supplied override, bypassing sanitization. The
    /// directory must already exist.
    pub fn accept_override(&self, path: &Path) -> Result<PathBuf, WorkdirError> {
        if path.is_file() {
            return Err(WorkdirError::NotADirectory(path.display().to_string()));
        }
        if !path.is_dir() {
            return Err(WorkdirError::CreateFailed(format!(
                "override path does not exist: {}",
                path.display()
            )));
        }
        Ok(path.to_path_buf())
    }
}

#[cfg(unix)]
fn set_permissions(path: &Path) -> Result<(), WorkdirError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| WorkdirError::CreateFailed(e.to_string()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path) -> Result<(), WorkdirError> {
    Ok(())
}

/// Replace path separators and other non-portable characters with `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "conduit-workdir-test-{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn sanitizes_path_separators() {
        assert_eq!(sanitize("a/b\\c"), "a_b_c");
        assert_eq!(sanitize("plain-name_1.txt"), "plain-name_1.txt");
    }

    #[test]
    fn allocates_and_creates_directory() {
        let root = tempdir();
        let allocator = SessionDirectoryAllocator::new(root.clone());
        let dir = allocator.allocate("alpha").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, root.join("alpha"));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn allocate_is_idempotent() {
        let root = tempdir();
        let allocator = SessionDirectoryAllocator::new(root.clone());
        let first = allocator.allocate("alpha").unwrap();
        let second = allocator.allocate("alpha").unwrap();
        assert_eq!(first, second);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn allocate_rejects_existing_file() {
        let root = tempdir();
        std::fs::write(root.join("alpha"), b"not a dir").unwrap();
        let allocator = SessionDirectoryAllocator::new(root.clone());
        let err = allocator.allocate("alpha").unwrap_err();
        assert!(matches!(err, WorkdirError::NotADirectory(_)));
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn override_requires_existing_directory() {
        let root = tempdir();
        let allocator = SessionDirectoryAllocator::new(root.clone());
        let err = allocator
            .accept_override(&root.join("missing"))
            .unwrap_err();
        assert!(matches!(err, WorkdirError::CreateFailed(_)));
        let _ = std::fs::remove_dir_all(&root);
    }
}
