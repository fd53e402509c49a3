//! # Snapshot Sequencing
//!
//! Every mutation, data write or DDL, is tagged with a write-snapshot id
//! drawn from one shared counter. Stores apply the operation log and report
//! which snapshot they have fully applied; the minimum over the commit
//! quorum is the committed watermark.
//!
//! ## Modules
//!
//! - `sequencer`: [`SnapshotSequencer`], counter + watermark + persistence
//! - `listeners`: one-shot callbacks keyed by target snapshot id
//! - `quorum`: discovery listener that maintains the commit quorum

mod listeners;
mod quorum;
mod sequencer;

pub use listeners::SnapshotCallback;
pub use quorum::StoreQuorumListener;
pub use sequencer::SnapshotSequencer;

use serde::{Deserialize, Serialize};
use tessera_storage::MetaStoreError;

/// Logical timestamp that totally orders every mutation.
pub type SnapshotId = u64;

/// Identifier of a store replica (its node index within the store role).
pub type StoreId = u32;

/// Identifier of an ingestion queue.
pub type QueueId = u32;

/// Meta store paths owned by the sequencer.
pub mod paths {
    /// Reserved ceiling of handed-out write-snapshot ids.
    pub const WRITE_SNAPSHOT_ID: &str = "snapshot/write_snapshot_id";
    /// Last persisted committed snapshot.
    pub const COMMITTED: &str = "snapshot/committed";
    /// Last persisted per-queue tail offsets.
    pub const QUEUE_OFFSETS: &str = "snapshot/queue_offsets";
}

/// The globally committed snapshot: every participating store has applied
/// all batches up to `snapshot_id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedSnapshot {
    /// Committed write-snapshot id (the watermark).
    pub snapshot_id: SnapshotId,
    /// Latest DDL snapshot every participating store has applied.
    pub ddl_snapshot_id: SnapshotId,
}

/// Progress last reported by one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaCommit {
    /// Highest snapshot the store has applied.
    pub snapshot_id: SnapshotId,
    /// Highest DDL snapshot the store has applied.
    pub ddl_snapshot_id: SnapshotId,
    /// Applied offset per ingestion queue, indexed by [`QueueId`].
    pub queue_offsets: Vec<u64>,
    /// Wall-clock time of the last accepted report (millis since epoch).
    pub last_report_ms: i64,
}

/// Persisted reservation of write-snapshot ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WriteSnapshotRecord {
    pub reserved_until: SnapshotId,
}

/// Errors from the snapshot sequencer.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    /// Reading or writing recovery state failed.
    #[error("snapshot meta store error: {0}")]
    MetaStore(#[from] MetaStoreError),

    /// The sequencer stopped before the awaited snapshot committed.
    #[error("snapshot sequencer closed")]
    Closed,
}
