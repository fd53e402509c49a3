//! Progress reports from store replicas.

use std::sync::Arc;

use tracing::trace;

use super::{CommitSnapshotIdRequest, CommitSnapshotIdResponse};
use crate::snapshot::SnapshotSequencer;

/// Accepts `commit_snapshot_id` reports and forwards them to the sequencer.
#[derive(Debug, Clone)]
pub struct CommitService {
    sequencer: Arc<SnapshotSequencer>,
}

impl CommitService {
    /// Create the service.
    #[must_use]
    pub fn new(sequencer: Arc<SnapshotSequencer>) -> Self {
        Self { sequencer }
    }

    /// Record a store's progress.
    ///
    /// The report is applied before the first suspension point, so a
    /// caller that gives up on the response cannot abort it. A DDL id
    /// ahead of the data snapshot is accepted as reported: a store may
    /// apply a DDL batch before the snapshot it belongs to closes.
    #[allow(clippy::unused_async)]
    pub async fn commit_snapshot_id(
        &self,
        request: CommitSnapshotIdRequest,
    ) -> CommitSnapshotIdResponse {
        trace!(
            store_id = request.store_id,
            snapshot_id = request.snapshot_id,
            "commit report"
        );
        self.sequencer.commit_snapshot_id(
            request.store_id,
            request.snapshot_id,
            request.ddl_snapshot_id,
            &request.queue_offsets,
        );
        CommitSnapshotIdResponse::default()
    }
}
