//! Directory access used by the relay and the smart data scheduler

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};

/// Boxed reader returned by [`DirectoryAccess::open`]
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read-only view of the files the server can hand out
#[async_trait]
pub trait DirectoryAccess: Send + Sync {
    /// Names of the immediate subdirectories, sorted
    async fn list_subdirectories(&self, path: &str) -> Result<Vec<String>>;

    /// Names of the regular files directly inside `path`, sorted
    async fn list_files(&self, path: &str) -> Result<Vec<String>>;

    /// Open a file for sequential reading
    async fn open(&self, path: &str) -> Result<FileReader>;

    /// Read a whole file
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;
}

/// [`DirectoryAccess`] over the local filesystem.
///
/// Relative paths resolve against `root`; absolute paths are used as is.
#[derive(Debug, Clone)]
pub struct LocalDirectory {
    root: PathBuf,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn entries(&self, path: &str, want_dirs: bool) -> Result<Vec<String>> {
        let dir = self.resolve(path);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::io_read(&dir, e))?;

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| Error::io_read(&dir, e))? {
            let file_type = entry.file_type().await.map_err(|e| Error::io_read(entry.path(), e))?;
            let matches = if want_dirs {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if matches {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl DirectoryAccess for LocalDirectory {
    async fn list_subdirectories(&self, path: &str) -> Result<Vec<String>> {
        self.entries(path, true).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.entries(path, false).await
    }

    async fn open(&self, path: &str) -> Result<FileReader> {
        let full = self.resolve(path);
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| Error::io_read(&full, e))?;
        Ok(Box::new(file))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full).await.map_err(|e| Error::io_read(&full, e))
    }
}
