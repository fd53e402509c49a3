//! Path-keyed durable storage for small coordinator state.
//!
//! A [`MetaStore`] maps a logical path such as `snapshot/committed` to an
//! opaque byte blob. Two backends share the contract:
//!
//! - [`FileMetaStore`]: one file per path below a base directory
//! - [`ObjectStoreMetaStore`]: one object per path below a prefix in any
//!   [`object_store::ObjectStore`]
//!
//! There is no caching and no transaction support. Callers own any
//! read-modify-write sequence.

mod file_store;
mod remote_store;

pub use file_store::FileMetaStore;
pub use remote_store::ObjectStoreMetaStore;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Errors from meta store operations.
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    /// Nothing is stored at the path.
    #[error("meta path not found: {0}")]
    NotFound(String),

    /// The path is empty, absolute, or contains `.`/`..`/empty segments.
    #[error("invalid meta path '{path}': {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Local filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object store error.
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// A typed record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MetaStoreError {
    /// Returns `true` if the error means the path does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A validated logical path: relative, `/`-separated, no empty, `.` or `..`
/// segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaPath(String);

impl MetaPath {
    /// Validate and normalize a logical path.
    ///
    /// # Errors
    ///
    /// Returns [`MetaStoreError::InvalidPath`] if the path is empty,
    /// absolute, or has an empty, `.` or `..` segment.
    pub fn parse(path: &str) -> Result<Self, MetaStoreError> {
        let invalid = |reason| MetaStoreError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        if path.is_empty() {
            return Err(invalid("path is empty"));
        }
        if path.starts_with('/') {
            return Err(invalid("path must be relative"));
        }
        let trimmed = path.strip_suffix('/').unwrap_or(path);
        for segment in trimmed.split('/') {
            match segment {
                "" => return Err(invalid("empty path segment")),
                "." | ".." => return Err(invalid("relative path segment")),
                s if s.contains('\\') => return Err(invalid("backslash in path segment")),
                _ => {}
            }
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The normalized path string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for MetaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable path -> bytes storage.
///
/// Implementations must make `write` durable before returning and must
/// create any intermediate path segments on demand.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Returns whether a value is stored at `path`.
    async fn exists(&self, path: &str) -> Result<bool, MetaStoreError>;

    /// Read the value stored at `path`.
    ///
    /// Fails with [`MetaStoreError::NotFound`] if absent.
    async fn read(&self, path: &str) -> Result<Bytes, MetaStoreError>;

    /// Create or overwrite the value at `path`.
    async fn write(&self, path: &str, data: Bytes) -> Result<(), MetaStoreError>;

    /// Delete the value at `path`.
    ///
    /// Fails with [`MetaStoreError::NotFound`] if absent.
    async fn delete(&self, path: &str) -> Result<(), MetaStoreError>;
}

/// Typed JSON helpers layered over any [`MetaStore`].
#[async_trait]
pub trait MetaStoreExt: MetaStore {
    /// Read and decode a JSON record, `None` if the path is absent.
    async fn read_json<T>(&self, path: &str) -> Result<Option<T>, MetaStoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(MetaStoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Encode a record as JSON and write it.
    async fn write_json<T>(&self, path: &str, value: &T) -> Result<(), MetaStoreError>
    where
        T: Serialize + Sync,
    {
        let data = serde_json::to_vec(value)?;
        self.write(path, Bytes::from(data)).await
    }
}

impl<S: MetaStore + ?Sized> MetaStoreExt for S {}
