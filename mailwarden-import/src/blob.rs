//! Blob-source contract and the filesystem implementation
//!
//! The production object store (S3-compatible) is a collaborator; the
//! pipeline only needs list/get/put/delete with last-modified ordering.

use crate::{ImportError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One stored object.
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Minimal object-store surface used by the importer.
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn list(&self) -> Result<Vec<BlobObject>>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Directory-backed blob source; keys are relative paths.
pub struct FsBlobSource {
    root: PathBuf,
}

impl FsBlobSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(ImportError::Blob(format!("invalid key: {}", key)));
        }
        Ok(self.root.join(key))
    }

    fn walk(dir: &Path, root: &Path, out: &mut Vec<BlobObject>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, root, out)?;
                continue;
            }
            let metadata = entry.metadata()?;
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let key = path
                .strip_prefix(root)
                .map_err(|_| std::io::Error::other("path outside root"))?
                .to_string_lossy()
                .replace('\\', "/");
            out.push(BlobObject { key, last_modified: modified, size: metadata.len() });
        }
        Ok(())
    }
}

#[async_trait]
impl BlobSource for FsBlobSource {
    async fn list(&self) -> Result<Vec<BlobObject>> {
        let mut out = Vec::new();
        if self.root.exists() {
            Self::walk(&self.root, &self.root, &mut out).map_err(|e| ImportError::Blob(e.to_string()))?;
        }
        Ok(out)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(key)?).await?)
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::write(path, bytes).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Ok(tokio::fs::remove_file(self.path_for(key)?).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsBlobSource::new(dir.path());

        source.put("drops/a.csv", b"email\n").await.unwrap();
        source.put("processed/00001-t-Mailable.csv", b"email\n").await.unwrap();

        let listed = source.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|o| o.key == "drops/a.csv"));

        assert_eq!(source.get("drops/a.csv").await.unwrap(), b"email\n");
        source.delete("drops/a.csv").await.unwrap();
        assert_eq!(source.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsBlobSource::new(dir.path());
        assert!(source.get("../etc/passwd").await.is_err());
    }
}
