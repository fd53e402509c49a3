//! Filesystem-backed meta store.
//!
//! Each logical path maps to one file below the base directory. Writes go
//! to a `.tmp` sibling first and are renamed into place, so a crash leaves
//! either the old value or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use super::{MetaPath, MetaStore, MetaStoreError};

/// Suffix of the temporary file a write lands in before the rename.
const TMP_SUFFIX: &str = ".tmp";

/// [`MetaStore`] rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FileMetaStore {
    root: PathBuf,
}

impl FileMetaStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// the first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The base directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<(MetaPath, PathBuf), MetaStoreError> {
        let meta_path = MetaPath::parse(path)?;
        let mut full = self.root.clone();
        full.extend(meta_path.segments());
        Ok((meta_path, full))
    }

    fn tmp_path(full: &Path) -> PathBuf {
        let mut name = full.as_os_str().to_owned();
        name.push(TMP_SUFFIX);
        PathBuf::from(name)
    }
}

#[async_trait]
impl MetaStore for FileMetaStore {
    async fn exists(&self, path: &str) -> Result<bool, MetaStoreError> {
        let (_, full) = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, MetaStoreError> {
        let (meta_path, full) = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(MetaStoreError::NotFound(meta_path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<(), MetaStoreError> {
        let (meta_path, full) = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = Self::tmp_path(&full);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &full).await?;

        tracing::trace!(path = %meta_path, bytes = data.len(), "meta value written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), MetaStoreError> {
        let (meta_path, full) = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(MetaStoreError::NotFound(meta_path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
