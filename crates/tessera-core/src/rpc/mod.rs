//! # Replica RPC Endpoints
//!
//! The two narrow endpoints store replicas and ingestors call on the
//! coordinator. Transport-agnostic: request and response types are plain
//! serde structs, and each service is a thin pass-through onto
//! [`SnapshotSequencer`](crate::snapshot::SnapshotSequencer). Neither
//! endpoint has a failure mode of its own: odd reports are absorbed by the
//! sequencer's monotonic bookkeeping.

mod commit_service;
mod ingest_progress;

pub use commit_service::CommitService;
pub use ingest_progress::IngestProgressService;

use serde::{Deserialize, Serialize};

use crate::snapshot::{QueueId, SnapshotId, StoreId};

/// A store's progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSnapshotIdRequest {
    /// Reporting store.
    pub store_id: StoreId,
    /// Highest snapshot the store has fully applied.
    pub snapshot_id: SnapshotId,
    /// Highest DDL snapshot the store has applied.
    pub ddl_snapshot_id: SnapshotId,
    /// Applied offset per ingestion queue, indexed by queue id.
    #[serde(default)]
    pub queue_offsets: Vec<u64>,
}

/// Acknowledgement of a progress report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSnapshotIdResponse {}

/// Request for the offsets every store has applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTailOffsetsRequest {
    /// Queues to report on.
    pub queue_ids: Vec<QueueId>,
}

/// Tail offsets, positionally matching the requested queue ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTailOffsetsResponse {
    /// Offset per requested queue, `None` if no store reported it.
    pub offsets: Vec<Option<u64>>,
}
