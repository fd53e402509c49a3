//! # Tessera Storage
//!
//! Durable small-state storage for the Tessera coordinator.
//!
//! The coordinator keeps only a handful of rarely written values on disk:
//! the reserved write-snapshot id ceiling, the last committed snapshot and
//! the per-queue tail offsets. They live in a [`meta::MetaStore`], keyed by a
//! logical path, behind either a local directory or an object store prefix.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Path-keyed meta store and its backends.
pub mod meta;

pub use meta::{
    FileMetaStore, MetaPath, MetaStore, MetaStoreError, MetaStoreExt, ObjectStoreMetaStore,
};
