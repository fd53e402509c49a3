//! Tail offsets for ingestors resuming their queues.

use std::sync::Arc;

use super::{GetTailOffsetsRequest, GetTailOffsetsResponse};
use crate::snapshot::SnapshotSequencer;

/// Serves `get_tail_offsets` from the sequencer.
#[derive(Debug, Clone)]
pub struct IngestProgressService {
    sequencer: Arc<SnapshotSequencer>,
}

impl IngestProgressService {
    /// Create the service.
    #[must_use]
    pub fn new(sequencer: Arc<SnapshotSequencer>) -> Self {
        Self { sequencer }
    }

    /// Offsets every participating store has applied, per queue. An
    /// empty request gets an empty answer.
    #[allow(clippy::unused_async)]
    pub async fn get_tail_offsets(&self, request: GetTailOffsetsRequest) -> GetTailOffsetsResponse {
        GetTailOffsetsResponse {
            offsets: self.sequencer.get_tail_offsets(&request.queue_ids),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequencerConfig;
    use tessera_storage::{FileMetaStore, MetaStore};

    #[tokio::test]
    async fn test_offsets_follow_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let meta: Arc<dyn MetaStore> = Arc::new(FileMetaStore::new(dir.path()));
        let seq = SnapshotSequencer::open(SequencerConfig::default(), meta)
            .await
            .unwrap();
        seq.commit_snapshot_id(0, 1, 0, &[5, 7]);
        let service = IngestProgressService::new(seq);

        let resp = service
            .get_tail_offsets(GetTailOffsetsRequest {
                queue_ids: vec![1, 4, 0],
            })
            .await;
        assert_eq!(resp.offsets, vec![Some(7), None, Some(5)]);

        let empty = service
            .get_tail_offsets(GetTailOffsetsRequest { queue_ids: vec![] })
            .await;
        assert!(empty.offsets.is_empty());
    }
}
