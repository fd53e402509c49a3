//! Object-store-backed meta store.
//!
//! Used when coordinator state has to outlive the local disk, e.g. when the
//! coordinator is rescheduled onto another host. Any
//! [`object_store::ObjectStore`] works; paths are placed below a fixed
//! prefix so several clusters can share one bucket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::path::Path;
use object_store::{GetOptions, ObjectStore, PutOptions, PutPayload};

use super::{MetaPath, MetaStore, MetaStoreError};

/// Upper bound on the total time spent retrying a single write.
const MAX_WRITE_RETRY: Duration = Duration::from_secs(30);

/// [`MetaStore`] rooted at a prefix of an [`ObjectStore`].
pub struct ObjectStoreMetaStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreMetaStore {
    /// Create a store that keeps every path below `prefix`.
    ///
    /// Leading and trailing `/` are ignored; an empty prefix uses the store
    /// root.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    /// The normalized prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn location(&self, path: &str) -> Result<(MetaPath, Path), MetaStoreError> {
        let meta_path = MetaPath::parse(path)?;
        let location = if self.prefix.is_empty() {
            Path::from(meta_path.as_str())
        } else {
            Path::from(format!("{}/{}", self.prefix, meta_path))
        };
        Ok((meta_path, location))
    }

    /// Write with exponential backoff on transient errors.
    async fn put_with_retry(&self, location: &Path, data: Bytes) -> Result<(), MetaStoreError> {
        let payload = PutPayload::from_bytes(data);
        let op = || async {
            self.store
                .put_opts(location, payload.clone(), PutOptions::default())
                .await
                .map_err(|e| match &e {
                    object_store::Error::Generic { .. } => {
                        backoff::Error::transient(MetaStoreError::ObjectStore(e))
                    }
                    _ => backoff::Error::permanent(MetaStoreError::ObjectStore(e)),
                })?;
            Ok(())
        };

        let backoff = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(MAX_WRITE_RETRY))
            .build();

        backoff::future::retry(backoff, op).await
    }

    fn map_not_found(meta_path: &MetaPath, e: object_store::Error) -> MetaStoreError {
        match e {
            object_store::Error::NotFound { .. } => MetaStoreError::NotFound(meta_path.to_string()),
            other => MetaStoreError::ObjectStore(other),
        }
    }
}

impl std::fmt::Debug for ObjectStoreMetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreMetaStore")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl MetaStore for ObjectStoreMetaStore {
    async fn exists(&self, path: &str) -> Result<bool, MetaStoreError> {
        let (_, location) = self.location(path)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, MetaStoreError> {
        let (meta_path, location) = self.location(path)?;
        let result = self
            .store
            .get_opts(&location, GetOptions::default())
            .await
            .map_err(|e| Self::map_not_found(&meta_path, e))?;
        Ok(result.bytes().await?)
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<(), MetaStoreError> {
        // Object stores have no directories; intermediate segments exist
        // implicitly as soon as the object is written.
        let (meta_path, location) = self.location(path)?;
        let len = data.len();
        self.put_with_retry(&location, data).await?;
        tracing::trace!(path = %meta_path, bytes = len, "meta object written");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), MetaStoreError> {
        let (meta_path, location) = self.location(path)?;
        // Several backends treat deleting a missing object as success.
        self.store
            .head(&location)
            .await
            .map_err(|e| Self::map_not_found(&meta_path, e))?;
        self.store.delete(&location).await?;
        Ok(())
    }
}
