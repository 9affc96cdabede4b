//! Single-instance lock per operation
//!
//! A marker file created with create-new semantics. It holds the owner's pid and
//! is removed on [`ProcessLock::release`] or on drop.

use crate::error::{RegistryError, Result};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    held: bool,
}

impl ProcessLock {
    /// Default lock file for an operation (`download` or `upload`)
    pub fn default_path(operation: &str) -> PathBuf {
        std::env::temp_dir().join(format!("image-courier.{}.lock", operation))
    }

    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(RegistryError::Lock(format!(
                    "Another instance is already running; if it stopped, delete {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(RegistryError::Lock(format!(
                    "Failed to create lock file {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path, held: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if self.held {
            let _ = std::fs::remove_file(&self.path);
            self.held = false;
        }
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image-courier.download.lock");

        let mut first = ProcessLock::acquire(&path).unwrap();
        assert!(path.exists());
        assert!(matches!(ProcessLock::acquire(&path), Err(RegistryError::Lock(_))));

        first.release();
        assert!(!path.exists());
        let _second = ProcessLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_drop_removes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image-courier.upload.lock");
        {
            let _lock = ProcessLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_default_path_names_operation() {
        let path = ProcessLock::default_path("upload");
        assert!(path.ends_with("image-courier.upload.lock"));
    }
}
