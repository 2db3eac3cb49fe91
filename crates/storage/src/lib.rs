use anyhow::{Result, Context};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

mod preferences;

pub use preferences::Preferences;

/// Storage trait for outbound file reads and inbound file persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    async fn write_file(&self, dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf>;
}

/// Local filesystem-based storage implementation.
#[derive(Clone, Debug, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let data = fs::read(path).await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        tracing::debug!("Read {} ({} bytes)", path.display(), data.len());
        Ok(data)
    }

    async fn write_file(&self, dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(dir).await
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        // Overwrites any previous file with the same name
        let path = dir.join(name);
        fs::write(&path, data).await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!("Stored {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_storage_write_then_read() -> Result<()> {
        let temp = TempDir::new()?;
        let storage = LocalStorage::new();

        let data = b"test file data";
        let path = storage.write_file(temp.path(), "a.bin", data).await?;
        assert_eq!(path, temp.path().join("a.bin"));

        let retrieved = storage.read_file(&path).await?;
        assert_eq!(retrieved, data.to_vec());

        assert!(storage.read_file(&temp.path().join("missing")).await.is_err());

        Ok(())
    }

    #[tokio::test]
    async fn test_storage_overwrites_and_creates_dir() -> Result<()> {
        let temp = TempDir::new()?;
        let storage = LocalStorage::new();
        let dir = temp.path().join("nested").join("out");

        storage.write_file(&dir, "f.txt", b"first").await?;
        let path = storage.write_file(&dir, "f.txt", b"second").await?;

        assert_eq!(std::fs::read(path)?, b"second".to_vec());
        Ok(())
    }
}
