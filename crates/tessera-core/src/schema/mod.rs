//! # Schema Management
//!
//! The graph schema model, DDL translation, and the serial orchestrator
//! that turns DDL requests into committed, atomically visible schema
//! versions.
//!
//! ## State Machine
//!
//! ```text
//! RECOVERING ──(barrier committed, schema fetched)──► READY
//!      ▲                                                │
//!      └──────────────(any submission error)────────────┘
//! ```

mod ddl;
mod graph_def;
mod manager;

pub use ddl::{
    DdlError, DdlExecutor, DdlOperation, DdlRequest, DdlRequestBatch, DdlResult,
    GraphDefDdlExecutor, PropertySpec, TypeSpec,
};
pub use graph_def::{DataType, EdgeKind, GraphDef, PropertyDef, TypeDef, TypeKind};
pub use manager::SchemaManager;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::oplog::LogError;
use crate::snapshot::SequencerError;

/// Errors from fetching the persisted schema.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The schema source cannot be reached.
    #[error("schema source unavailable: {0}")]
    Unavailable(String),

    /// The schema source returned an unusable schema.
    #[error("schema source returned a corrupt schema: {0}")]
    Corrupt(String),
}

/// Errors from the schema manager.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The manager is recovering; retry later.
    #[error("schema manager is not ready")]
    NotReady,

    /// The DDL batch is invalid.
    #[error(transparent)]
    Ddl(#[from] ddl::DdlError),

    /// Appending to the operation log failed.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The snapshot sequencer failed or stopped.
    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    /// Fetching the persisted schema failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The executor produced a schema with an unexpected version.
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version the new schema should have.
        expected: u64,
        /// Version it has.
        actual: u64,
    },

    /// The manager stopped before the request completed.
    #[error("schema manager shut down")]
    Shutdown,
}

/// Source of the latest schema the stores have persisted. Used only during
/// recovery.
#[async_trait]
pub trait GraphDefFetcher: Send + Sync + 'static {
    /// Fetch the latest persisted schema.
    async fn fetch_graph_def(&self) -> Result<GraphDef, FetchError>;
}

/// [`GraphDefFetcher`] backed by a value held in memory.
///
/// Whoever applies DDL operations on the store side updates it with
/// [`set`](Self::set).
#[derive(Debug, Default)]
pub struct InMemoryGraphDefFetcher {
    graph_def: Mutex<GraphDef>,
    unavailable: AtomicBool,
}

impl InMemoryGraphDefFetcher {
    /// Start from `graph_def`.
    #[must_use]
    pub fn new(graph_def: GraphDef) -> Self {
        Self {
            graph_def: Mutex::new(graph_def),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Replace the persisted schema.
    pub fn set(&self, graph_def: GraphDef) {
        *self.graph_def.lock() = graph_def;
    }

    /// The persisted schema.
    #[must_use]
    pub fn current(&self) -> GraphDef {
        self.graph_def.lock().clone()
    }

    /// Make fetches fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphDefFetcher for InMemoryGraphDefFetcher {
    async fn fetch_graph_def(&self) -> Result<GraphDef, FetchError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FetchError::Unavailable("in-memory schema switched off".into()));
        }
        Ok(self.current())
    }
}
