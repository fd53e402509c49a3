//! Commit quorum maintained from store membership.

use std::sync::Arc;

use tracing::info;

use super::SnapshotSequencer;
use crate::discovery::{BackendState, NodeDiscoveryListener, RoleNodes, RoleType};

/// Keeps the sequencer's commit quorum equal to the live store nodes.
///
/// A store that joins is added to the quorum; a store that leaves is
/// removed and its reports are forgotten. Other roles are ignored.
#[derive(Debug)]
pub struct StoreQuorumListener {
    sequencer: Arc<SnapshotSequencer>,
}

impl StoreQuorumListener {
    /// Create a listener feeding `sequencer`.
    #[must_use]
    pub fn new(sequencer: Arc<SnapshotSequencer>) -> Self {
        Self { sequencer }
    }
}

impl NodeDiscoveryListener for StoreQuorumListener {
    fn nodes_joined(&self, role: RoleType, nodes: &RoleNodes) {
        if role == RoleType::Store {
            self.sequencer.add_quorum_stores(nodes.keys().copied());
        }
    }

    fn nodes_left(&self, role: RoleType, nodes: &RoleNodes) {
        if role == RoleType::Store {
            self.sequencer.remove_quorum_stores(nodes.keys().copied());
        }
    }

    fn state_changed(&self, state: BackendState) {
        if state == BackendState::Lost {
            info!(
                quorum = ?self.sequencer.quorum(),
                "discovery session lost; keeping commit quorum until membership changes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequencerConfig;
    use crate::discovery::NodeAddress;
    use tessera_storage::{FileMetaStore, MetaStore};

    fn stores(indexes: &[u32]) -> RoleNodes {
        indexes
            .iter()
            .map(|&i| (i, NodeAddress::new(format!("store-{i}"), 7000)))
            .collect()
    }

    #[tokio::test]
    async fn test_store_membership_drives_quorum() {
        let dir = tempfile::tempdir().unwrap();
        let meta: Arc<dyn MetaStore> = Arc::new(FileMetaStore::new(dir.path()));
        let seq = SnapshotSequencer::open(SequencerConfig::default(), meta)
            .await
            .unwrap();
        let listener = StoreQuorumListener::new(Arc::clone(&seq));

        listener.nodes_joined(RoleType::Frontend, &stores(&[7]));
        assert_eq!(seq.quorum(), None);

        listener.nodes_joined(RoleType::Store, &stores(&[0, 1]));
        assert_eq!(seq.quorum(), Some(vec![0, 1]));

        seq.commit_snapshot_id(0, 8, 0, &[]);
        seq.commit_snapshot_id(1, 3, 0, &[]);
        assert_eq!(seq.committed().snapshot_id, 3);

        listener.nodes_left(RoleType::Store, &stores(&[1]));
        assert_eq!(seq.quorum(), Some(vec![0]));
        assert_eq!(seq.committed().snapshot_id, 8);
    }
}
