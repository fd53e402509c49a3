//! # Operation Log
//!
//! The durable, append-only log replicas consume, and the one code path
//! that tags batches with a write-snapshot id and appends them.
//!
//! [`BatchWriter`] holds the write-snapshot lock from "read current id"
//! through "append", so no id advance can slip between the two. Data
//! ingestion and DDL submission both go through it, which puts DDL and
//! data writes in one total order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::snapshot::{SnapshotId, SnapshotSequencer};

/// Where a batch landed in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId {
    /// Write-snapshot id the batch was tagged with.
    pub snapshot_id: SnapshotId,
    /// Position of the batch in the log.
    pub log_offset: u64,
}

/// Kind of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Create a vertex type.
    CreateVertexType,
    /// Drop a vertex type.
    DropVertexType,
    /// Create an edge type.
    CreateEdgeType,
    /// Drop an edge type.
    DropEdgeType,
    /// Allow an edge type between two vertex types.
    AddEdgeKind,
    /// Disallow an edge type between two vertex types.
    RemoveEdgeKind,
    /// Snapshot marker without payload.
    Marker,
    /// Insert or overwrite a vertex.
    OverwriteVertex,
    /// Update vertex properties.
    UpdateVertex,
    /// Delete a vertex.
    DeleteVertex,
    /// Insert or overwrite an edge.
    OverwriteEdge,
    /// Update edge properties.
    UpdateEdge,
    /// Delete an edge.
    DeleteEdge,
}

impl OperationType {
    /// Whether the operation changes the schema.
    #[must_use]
    pub const fn is_ddl(self) -> bool {
        matches!(
            self,
            Self::CreateVertexType
                | Self::DropVertexType
                | Self::CreateEdgeType
                | Self::DropEdgeType
                | Self::AddEdgeKind
                | Self::RemoveEdgeKind
        )
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateVertexType => "create_vertex_type",
            Self::DropVertexType => "drop_vertex_type",
            Self::CreateEdgeType => "create_edge_type",
            Self::DropEdgeType => "drop_edge_type",
            Self::AddEdgeKind => "add_edge_kind",
            Self::RemoveEdgeKind => "remove_edge_kind",
            Self::Marker => "marker",
            Self::OverwriteVertex => "overwrite_vertex",
            Self::UpdateVertex => "update_vertex",
            Self::DeleteVertex => "delete_vertex",
            Self::OverwriteEdge => "overwrite_edge",
            Self::UpdateEdge => "update_edge",
            Self::DeleteEdge => "delete_edge",
        };
        f.write_str(name)
    }
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Operation kind.
    pub op_type: OperationType,
    /// Target partition, or `None` for every partition.
    pub partition_id: Option<u32>,
    /// Encoded operation body.
    pub payload: Bytes,
}

impl Operation {
    /// Create an operation.
    #[must_use]
    pub fn new(op_type: OperationType, partition_id: Option<u32>, payload: impl Into<Bytes>) -> Self {
        Self {
            op_type,
            partition_id,
            payload: payload.into(),
        }
    }
}

/// Operations that land in the log together, all tagged with one
/// write-snapshot id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBatch {
    /// Write-snapshot id valid when the batch was assigned.
    pub latest_snapshot_id: SnapshotId,
    /// The operations, in order.
    pub operations: Vec<Operation>,
}

/// Errors from the operation log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The log is temporarily unreachable.
    #[error("operation log unavailable: {0}")]
    Unavailable(String),

    /// The log refused the batch.
    #[error("operation log rejected batch: {0}")]
    Rejected(String),
}

/// Durable append-only log of operation batches.
#[async_trait]
pub trait OperationLog: Send + Sync + 'static {
    /// Append a batch. The batch is crash-durable once this returns.
    async fn write_operations(
        &self,
        request_id: &str,
        batch: OperationBatch,
    ) -> Result<BatchId, LogError>;
}

/// Tags batches with the current write-snapshot id and appends them.
#[derive(Clone)]
pub struct BatchWriter {
    sequencer: Arc<SnapshotSequencer>,
    log: Arc<dyn OperationLog>,
}

impl BatchWriter {
    /// Create a writer appending to `log` under `sequencer`'s lock.
    #[must_use]
    pub fn new(sequencer: Arc<SnapshotSequencer>, log: Arc<dyn OperationLog>) -> Self {
        Self { sequencer, log }
    }

    /// The sequencer whose ids this writer assigns.
    #[must_use]
    pub fn sequencer(&self) -> &Arc<SnapshotSequencer> {
        &self.sequencer
    }

    /// Tag `operations` with the current write-snapshot id and append them
    /// as one batch.
    ///
    /// # Errors
    ///
    /// Returns the log's error if the append fails. The write-snapshot id
    /// is not advanced either way.
    pub async fn write(
        &self,
        request_id: &str,
        operations: Vec<Operation>,
    ) -> Result<BatchId, LogError> {
        let guard = self.sequencer.lock_write_snapshot().await;
        let batch = OperationBatch {
            latest_snapshot_id: guard.snapshot_id(),
            operations,
        };
        let count = batch.operations.len();
        let batch_id = self.log.write_operations(request_id, batch).await?;
        drop(guard);

        debug!(
            request_id,
            snapshot_id = batch_id.snapshot_id,
            log_offset = batch_id.log_offset,
            operations = count,
            "batch appended"
        );
        Ok(batch_id)
    }
}

impl fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriter")
            .field("sequencer", &self.sequencer)
            .finish_non_exhaustive()
    }
}

/// An appended batch as recorded by [`InMemoryOperationLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Request id supplied by the writer.
    pub request_id: String,
    /// Where the batch landed.
    pub batch_id: BatchId,
    /// The batch itself.
    pub batch: OperationBatch,
}

/// Operation log kept in memory.
///
/// Offsets are positions in the entry list. Availability can be toggled
/// to exercise failure handling.
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    entries: Mutex<Vec<LogEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryOperationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every appended batch, in log order.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Entries appended at or after `offset`.
    #[must_use]
    pub fn entries_from(&self, offset: u64) -> Vec<LogEntry> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        self.entries.lock().iter().skip(start).cloned().collect()
    }

    /// Number of appended batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make appends fail with [`LogError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl OperationLog for InMemoryOperationLog {
    async fn write_operations(
        &self,
        request_id: &str,
        batch: OperationBatch,
    ) -> Result<BatchId, LogError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LogError::Unavailable("in-memory log switched off".into()));
        }
        if batch.operations.is_empty() {
            return Err(LogError::Rejected("empty batch".into()));
        }
        let mut entries = self.entries.lock();
        let batch_id = BatchId {
            snapshot_id: batch.latest_snapshot_id,
            log_offset: entries.len() as u64,
        };
        entries.push(LogEntry {
            request_id: request_id.to_string(),
            batch_id,
            batch,
        });
        Ok(batch_id)
    }
}
