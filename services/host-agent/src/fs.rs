//! [`FileSystem`] implementations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::ports::FileSystem;

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::remove_dir_all(path).await?)
    }
}

/// Directory tree kept in memory. Only directories are modelled.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    dirs: Mutex<BTreeSet<PathBuf>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn dirs(&self) -> std::sync::MutexGuard<'_, BTreeSet<PathBuf>> {
        self.dirs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.dirs().contains(path))
    }

    async fn is_dir(&self, path: &Path) -> Result<bool> {
        Ok(self.dirs().contains(path))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut dirs = self.dirs();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut dirs = self.dirs();
        if !dirs.contains(path) {
            anyhow::bail!("directory {} not found", path.display());
        }
        dirs.retain(|d| !d.starts_with(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_create_and_remove() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("vm/ns/vm1");
        let fs = LocalFileSystem;

        assert!(!fs.exists(&dir).await.unwrap());
        fs.create_dir_all(&dir).await.unwrap();
        assert!(fs.is_dir(&dir).await.unwrap());

        fs.remove_dir_all(&tmp.path().join("vm/ns")).await.unwrap();
        assert!(!fs.exists(&dir).await.unwrap());
        assert!(fs.is_dir(&tmp.path().join("vm")).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_is_dir_for_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file");
        std::fs::write(&file, "x").unwrap();

        assert!(LocalFileSystem.exists(&file).await.unwrap());
        assert!(!LocalFileSystem.is_dir(&file).await.unwrap());
        assert!(!LocalFileSystem.is_dir(&tmp.path().join("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_ancestors_and_descendants() {
        let fs = MemoryFileSystem::new();
        fs.create_dir_all(Path::new("/state/vm/ns/vm1/uid1")).await.unwrap();
        fs.create_dir_all(Path::new("/state/vm/ns/vm2")).await.unwrap();

        assert!(fs.exists(Path::new("/state/vm/ns")).await.unwrap());

        fs.remove_dir_all(Path::new("/state/vm/ns/vm1")).await.unwrap();
        assert!(!fs.exists(Path::new("/state/vm/ns/vm1/uid1")).await.unwrap());
        assert!(fs.exists(Path::new("/state/vm/ns/vm2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_remove_missing() {
        let fs = MemoryFileSystem::new();
        assert!(fs.remove_dir_all(Path::new("/nope")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_sibling_prefix_is_kept() {
        let fs = MemoryFileSystem::new();
        fs.create_dir_all(Path::new("/state/vm1")).await.unwrap();
        fs.create_dir_all(Path::new("/state/vm10")).await.unwrap();

        fs.remove_dir_all(Path::new("/state/vm1")).await.unwrap();
        assert!(fs.exists(Path::new("/state/vm10")).await.unwrap());
    }
}
