//! Completed-file placement for squirrel-dl
//!
//! Once a transfer finishes, the temp blob is moved into a permanent
//! location named after the download's identifier. The manager only ever
//! talks to the [`FileStore`] contract.

use std::path::{Path, PathBuf};

use crate::core::error::{Error, Result};

/// Places, deletes and resolves completed download files.
pub trait FileStore: Send + Sync {
    /// Moves a finished temp file into the store under `destination_name`,
    /// replacing any previous file of that name. Returns the final path.
    fn move_temp(&self, location: &Path, destination_name: &str) -> Result<PathBuf>;

    /// Deletes the stored file `name`. Returns `false` if deletion failed;
    /// a file that is already gone counts as deleted.
    fn delete(&self, name: &str) -> bool;

    /// Resolves a stored file name to an absolute path, or `None` if the
    /// store has no backing directory to resolve against.
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// File store rooted at a local directory.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileStore for LocalFileStore {
    fn move_temp(&self, location: &Path, destination_name: &str) -> Result<PathBuf> {
        let destination = self.resolve(destination_name).ok_or_else(|| {
            Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "download directory is not available",
            ))
        })?;

        std::fs::create_dir_all(&self.root)?;
        if destination.exists() {
            std::fs::remove_file(&destination)?;
        }

        // Rename, with a copy fallback when temp and destination live on
        // different filesystems.
        if std::fs::rename(location, &destination).is_err() {
            std::fs::copy(location, &destination)?;
            std::fs::remove_file(location)?;
        }

        Ok(destination)
    }

    fn delete(&self, name: &str) -> bool {
        let Some(path) = self.resolve(name) else {
            return false;
        };
        if !path.exists() {
            return true;
        }
        std::fs::remove_file(path).is_ok()
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if self.root.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(name))
    }
}
