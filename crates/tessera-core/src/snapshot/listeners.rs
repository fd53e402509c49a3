//! Registry of callbacks waiting for a snapshot to commit.

use std::collections::BTreeMap;
use std::fmt;

use super::{CommittedSnapshot, SnapshotId};

/// Callback fired once the watermark reaches its target snapshot.
pub type SnapshotCallback = Box<dyn FnOnce(CommittedSnapshot) + Send + 'static>;

/// Pending callbacks ordered by target snapshot id.
///
/// Each callback is stored exactly once and handed out exactly once, which
/// is what makes firing single-shot.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    pending: BTreeMap<SnapshotId, Vec<SnapshotCallback>>,
    len: usize,
}

impl ListenerRegistry {
    pub(crate) fn register(&mut self, snapshot_id: SnapshotId, callback: SnapshotCallback) {
        self.pending.entry(snapshot_id).or_default().push(callback);
        self.len += 1;
    }

    /// Remove and return every callback whose target is `<= watermark`.
    pub(crate) fn take_satisfied(&mut self, watermark: SnapshotId) -> Vec<SnapshotCallback> {
        let ready = match watermark.checked_add(1) {
            Some(bound) => {
                let still_pending = self.pending.split_off(&bound);
                std::mem::replace(&mut self.pending, still_pending)
            }
            None => std::mem::take(&mut self.pending),
        };
        let fired: Vec<SnapshotCallback> = ready.into_values().flatten().collect();
        self.len -= fired.len();
        fired
    }

    /// Drop every pending callback without firing it.
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.len;
        self.pending.clear();
        self.len = 0;
        dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Lowest snapshot id somebody is waiting for.
    pub(crate) fn lowest_target(&self) -> Option<SnapshotId> {
        self.pending.keys().next().copied()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("targets", &self.pending.len())
            .field("callbacks", &self.len)
            .finish()
    }
}
