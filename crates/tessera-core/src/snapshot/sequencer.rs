//! The write-snapshot sequencer and commit watermark.
//!
//! ## Locks
//!
//! - `state` (`parking_lot::Mutex`): counter, replica records, quorum,
//!   listener registry. Held for bookkeeping only, never across `.await`,
//!   and never while a listener callback runs.
//! - `write_lock` (`tokio::sync::Mutex`): the write-snapshot lock. Held
//!   from "read current id" through "append tagged batch", and while the
//!   counter advances, so an id never moves under an in-flight append.
//!
//! ## Recovery
//!
//! Ids are reserved in blocks. The reserved ceiling is persisted before any
//! id beyond the previous ceiling is handed out, and a restarted sequencer
//! resumes strictly above the persisted ceiling, so no id is ever reused.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_storage::{MetaStore, MetaStoreExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::listeners::{ListenerRegistry, SnapshotCallback};
use super::{
    paths, CommittedSnapshot, QueueId, ReplicaCommit, SequencerError, SnapshotId, StoreId,
    WriteSnapshotRecord,
};
use crate::config::SequencerConfig;
use crate::error_codes;

/// Reserved id range guarded by the write-snapshot lock.
#[derive(Debug)]
struct IdReservation {
    reserved_until: SnapshotId,
}

/// Progress as last written to the meta store.
#[derive(Debug, Default, PartialEq, Eq)]
struct PersistedProgress {
    committed: CommittedSnapshot,
    tail_offsets: Vec<Option<u64>>,
}

#[derive(Debug)]
struct SequencerState {
    write_snapshot_id: SnapshotId,
    committed: CommittedSnapshot,
    tail_offsets: Vec<Option<u64>>,
    replicas: HashMap<StoreId, ReplicaCommit>,
    quorum: Option<BTreeSet<StoreId>>,
    listeners: ListenerRegistry,
}

impl SequencerState {
    /// Record a store report. Returns `false` if the report was stale.
    fn apply_report(
        &mut self,
        store_id: StoreId,
        snapshot_id: SnapshotId,
        ddl_snapshot_id: SnapshotId,
        queue_offsets: &[u64],
    ) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        let record = self.replicas.entry(store_id).or_insert_with(|| {
            info!(store_id, snapshot_id, "first commit report from store");
            ReplicaCommit {
                snapshot_id,
                ddl_snapshot_id,
                queue_offsets: Vec::new(),
                last_report_ms: now,
            }
        });

        if snapshot_id < record.snapshot_id {
            debug!(
                store_id,
                reported = snapshot_id,
                recorded = record.snapshot_id,
                "[{}] ignoring stale commit report",
                error_codes::STALE_COMMIT_REPORT
            );
            return false;
        }

        record.snapshot_id = snapshot_id;
        record.ddl_snapshot_id = record.ddl_snapshot_id.max(ddl_snapshot_id);
        if record.queue_offsets.len() < queue_offsets.len() {
            record.queue_offsets.resize(queue_offsets.len(), 0);
        }
        for (current, &reported) in record.queue_offsets.iter_mut().zip(queue_offsets) {
            *current = (*current).max(reported);
        }
        record.last_report_ms = now;
        true
    }

    /// Records of the stores that count toward the watermark, or `None` if
    /// the watermark cannot be computed yet.
    fn participants(&self) -> Option<Vec<&ReplicaCommit>> {
        match &self.quorum {
            Some(quorum) if quorum.is_empty() => None,
            Some(quorum) => quorum.iter().map(|id| self.replicas.get(id)).collect(),
            None if self.replicas.is_empty() => None,
            None => Some(self.replicas.values().collect()),
        }
    }

    /// Recompute tail offsets and the watermark.
    ///
    /// The watermark is the minimum applied snapshot over the participating
    /// stores, and never moves backwards. Returns the new committed snapshot
    /// and the callbacks it satisfied if the watermark advanced.
    fn refresh(&mut self) -> Option<(CommittedSnapshot, Vec<SnapshotCallback>)> {
        let (min_snapshot, min_ddl, offsets) = {
            let participants = self.participants()?;
            let min_snapshot = participants.iter().map(|r| r.snapshot_id).min()?;
            let min_ddl = participants.iter().map(|r| r.ddl_snapshot_id).min()?;
            let queue_count = participants
                .iter()
                .map(|r| r.queue_offsets.len())
                .max()
                .unwrap_or(0);
            let offsets: Vec<Option<u64>> = (0..queue_count)
                .map(|queue| {
                    participants
                        .iter()
                        .map(|r| r.queue_offsets.get(queue).copied())
                        .min()
                        .flatten()
                })
                .collect();
            (min_snapshot, min_ddl, offsets)
        };

        if self.tail_offsets.len() < offsets.len() {
            self.tail_offsets.resize(offsets.len(), None);
        }
        for (current, computed) in self.tail_offsets.iter_mut().zip(offsets) {
            *current = (*current).max(computed);
        }

        if min_snapshot <= self.committed.snapshot_id {
            return None;
        }
        self.committed = CommittedSnapshot {
            snapshot_id: min_snapshot,
            ddl_snapshot_id: self.committed.ddl_snapshot_id.max(min_ddl),
        };
        let fired = self.listeners.take_satisfied(min_snapshot);
        Some((self.committed, fired))
    }
}

/// Hands out write-snapshot ids and tracks the committed watermark.
///
/// Shared as `Arc<SnapshotSequencer>` between the batch writer, the
/// schema manager, the RPC services and the discovery quorum listener.
pub struct SnapshotSequencer {
    config: SequencerConfig,
    meta_store: Arc<dyn MetaStore>,
    state: Mutex<SequencerState>,
    write_lock: tokio::sync::Mutex<IdReservation>,
    persisted: tokio::sync::Mutex<PersistedProgress>,
    commit_tx: watch::Sender<CommittedSnapshot>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SnapshotSequencer {
    /// Restore the sequencer from the meta store.
    ///
    /// The counter resumes one past the persisted id reservation, and a new
    /// reservation is persisted before returning. The committed watermark
    /// and tail offsets resume from their last persisted values.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::MetaStore`] if recovery state cannot be
    /// read or the new reservation cannot be written.
    pub async fn open(
        config: SequencerConfig,
        meta_store: Arc<dyn MetaStore>,
    ) -> Result<Arc<Self>, SequencerError> {
        let reservation: Option<WriteSnapshotRecord> =
            meta_store.read_json(paths::WRITE_SNAPSHOT_ID).await?;
        let committed: CommittedSnapshot = meta_store
            .read_json(paths::COMMITTED)
            .await?
            .unwrap_or_default();
        let tail_offsets: Vec<Option<u64>> = meta_store
            .read_json(paths::QUEUE_OFFSETS)
            .await?
            .unwrap_or_default();

        let previous_ceiling = reservation.map_or(0, |r| r.reserved_until);
        let write_snapshot_id = previous_ceiling.max(committed.snapshot_id).saturating_add(1);
        let reserved_until = write_snapshot_id.saturating_add(config.id_reservation);
        meta_store
            .write_json(
                paths::WRITE_SNAPSHOT_ID,
                &WriteSnapshotRecord { reserved_until },
            )
            .await?;

        info!(
            write_snapshot_id,
            reserved_until,
            committed = committed.snapshot_id,
            ddl_committed = committed.ddl_snapshot_id,
            "snapshot sequencer recovered"
        );

        let quorum = config.store_count.map(|n| (0..n).collect::<BTreeSet<_>>());
        let (commit_tx, _) = watch::channel(committed);

        Ok(Arc::new(Self {
            config,
            meta_store,
            state: Mutex::new(SequencerState {
                write_snapshot_id,
                committed,
                tail_offsets: tail_offsets.clone(),
                replicas: HashMap::new(),
                quorum,
                listeners: ListenerRegistry::default(),
            }),
            write_lock: tokio::sync::Mutex::new(IdReservation { reserved_until }),
            persisted: tokio::sync::Mutex::new(PersistedProgress {
                committed,
                tail_offsets,
            }),
            commit_tx,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Spawn the background persister and, if configured, the periodic
    /// write-snapshot advance. Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() || self.cancel.is_cancelled() {
            return;
        }
        tasks.push(tokio::spawn(Arc::clone(self).run_persister(
            self.config.persist_interval(),
        )));
        if let Some(interval) = self.config.snapshot_increase_interval() {
            tasks.push(tokio::spawn(Arc::clone(self).run_ticker(interval)));
        }
    }

    /// Stop background tasks, persist final progress, and drop every
    /// pending listener (their waiters observe [`SequencerError::Closed`]).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        let dropped = self.state.lock().listeners.clear();
        if dropped > 0 {
            debug!(dropped, "dropped pending snapshot listeners on stop");
        }
    }

    /// Current write-snapshot id, without advancing it.
    #[must_use]
    pub fn current_write_snapshot_id(&self) -> SnapshotId {
        self.state.lock().write_snapshot_id
    }

    /// Advance the write-snapshot id by one and return the new value.
    ///
    /// Takes the write-snapshot lock, so it waits for any in-flight batch
    /// append to finish first.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::MetaStore`] if a new id reservation had to
    /// be persisted and the write failed. The counter is unchanged then.
    pub async fn increase_write_snapshot_id(&self) -> Result<SnapshotId, SequencerError> {
        let mut guard = self.lock_write_snapshot().await;
        let next = guard.snapshot_id() + 1;
        self.reserve_through(&mut *guard.reservation, next).await?;
        self.state.lock().write_snapshot_id = next;
        debug!(write_snapshot_id = next, "write snapshot advanced");
        Ok(next)
    }

    /// Acquire the write-snapshot lock. Dropping the guard releases it.
    ///
    /// The lock is not reentrant: acquiring it twice from one task
    /// deadlocks.
    pub(crate) async fn lock_write_snapshot(&self) -> WriteSnapshotGuard<'_> {
        WriteSnapshotGuard {
            sequencer: self,
            reservation: self.write_lock.lock().await,
        }
    }

    async fn reserve_through(
        &self,
        reservation: &mut IdReservation,
        snapshot_id: SnapshotId,
    ) -> Result<(), SequencerError> {
        if snapshot_id <= reservation.reserved_until {
            return Ok(());
        }
        let reserved_until = snapshot_id.saturating_add(self.config.id_reservation);
        self.meta_store
            .write_json(
                paths::WRITE_SNAPSHOT_ID,
                &WriteSnapshotRecord { reserved_until },
            )
            .await?;
        reservation.reserved_until = reserved_until;
        debug!(reserved_until, "write snapshot ids reserved");
        Ok(())
    }

    /// Record a store's progress report.
    ///
    /// A report older than what the store already reported is ignored.
    /// If the watermark advances, every listener waiting for a snapshot at
    /// or below it fires, after the internal lock is released.
    pub fn commit_snapshot_id(
        &self,
        store_id: StoreId,
        snapshot_id: SnapshotId,
        ddl_snapshot_id: SnapshotId,
        queue_offsets: &[u64],
    ) {
        let advanced = {
            let mut state = self.state.lock();
            if !state.apply_report(store_id, snapshot_id, ddl_snapshot_id, queue_offsets) {
                return;
            }
            state.refresh()
        };
        self.publish(advanced);
    }

    fn publish(&self, advanced: Option<(CommittedSnapshot, Vec<SnapshotCallback>)>) {
        let Some((committed, fired)) = advanced else {
            return;
        };
        debug!(
            snapshot_id = committed.snapshot_id,
            ddl_snapshot_id = committed.ddl_snapshot_id,
            listeners = fired.len(),
            "commit watermark advanced"
        );
        self.commit_tx.send_replace(committed);
        for callback in fired {
            callback(committed);
        }
    }

    /// Run `callback` once the watermark reaches `snapshot_id`.
    ///
    /// If the watermark is already there the callback runs immediately on
    /// the calling thread.
    pub fn add_snapshot_listener<F>(&self, snapshot_id: SnapshotId, callback: F)
    where
        F: FnOnce(CommittedSnapshot) + Send + 'static,
    {
        let committed = {
            let mut state = self.state.lock();
            if state.committed.snapshot_id < snapshot_id {
                state.listeners.register(snapshot_id, Box::new(callback));
                return;
            }
            state.committed
        };
        callback(committed);
    }

    /// Wait until the watermark reaches `snapshot_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Closed`] if the sequencer is stopped first.
    pub async fn wait_committed(
        &self,
        snapshot_id: SnapshotId,
    ) -> Result<CommittedSnapshot, SequencerError> {
        let (tx, rx) = oneshot::channel();
        self.add_snapshot_listener(snapshot_id, move |committed| {
            let _ = tx.send(committed);
        });
        rx.await.map_err(|_| SequencerError::Closed)
    }

    /// The current committed snapshot.
    #[must_use]
    pub fn committed(&self) -> CommittedSnapshot {
        self.state.lock().committed
    }

    /// Subscribe to watermark advances.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CommittedSnapshot> {
        self.commit_tx.subscribe()
    }

    /// Offsets every participating store has applied, per requested queue.
    /// `None` for queues no participating store has reported.
    #[must_use]
    pub fn get_tail_offsets(&self, queue_ids: &[QueueId]) -> Vec<Option<u64>> {
        let state = self.state.lock();
        queue_ids
            .iter()
            .map(|&queue| {
                usize::try_from(queue)
                    .ok()
                    .and_then(|idx| state.tail_offsets.get(idx).copied().flatten())
            })
            .collect()
    }

    /// Last accepted report of a store.
    #[must_use]
    pub fn replica(&self, store_id: StoreId) -> Option<ReplicaCommit> {
        self.state.lock().replicas.get(&store_id).cloned()
    }

    /// Number of callbacks waiting for a snapshot to commit.
    #[must_use]
    pub fn pending_listeners(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Current commit quorum, or `None` if every reporting store counts.
    #[must_use]
    pub fn quorum(&self) -> Option<Vec<StoreId>> {
        self.state
            .lock()
            .quorum
            .as_ref()
            .map(|q| q.iter().copied().collect())
    }

    /// Add stores to the commit quorum.
    ///
    /// The watermark does not advance again until the new members have
    /// reported, and it never moves backwards because of them.
    pub fn add_quorum_stores(&self, stores: impl IntoIterator<Item = StoreId>) {
        let mut state = self.state.lock();
        let quorum = state.quorum.get_or_insert_with(BTreeSet::new);
        for store_id in stores {
            if quorum.insert(store_id) {
                info!(store_id, "store joined commit quorum");
            }
        }
    }

    /// Remove stores from the commit quorum and forget their reports.
    ///
    /// This may let the watermark advance, firing listeners.
    pub fn remove_quorum_stores(&self, stores: impl IntoIterator<Item = StoreId>) {
        let advanced = {
            let mut state = self.state.lock();
            for store_id in stores {
                let was_member = state
                    .quorum
                    .as_mut()
                    .is_some_and(|quorum| quorum.remove(&store_id));
                state.replicas.remove(&store_id);
                if was_member {
                    info!(store_id, "store left commit quorum");
                }
            }
            state.refresh()
        };
        self.publish(advanced);
    }

    /// Persist the committed snapshot and tail offsets if they changed
    /// since the last write.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::MetaStore`] if a write fails; the next
    /// call retries.
    pub async fn flush(&self) -> Result<(), SequencerError> {
        let mut persisted = self.persisted.lock().await;
        let (committed, tail_offsets) = {
            let state = self.state.lock();
            (state.committed, state.tail_offsets.clone())
        };

        if persisted.tail_offsets != tail_offsets {
            self.meta_store
                .write_json(paths::QUEUE_OFFSETS, &tail_offsets)
                .await?;
            persisted.tail_offsets = tail_offsets;
        }
        if persisted.committed != committed {
            self.meta_store
                .write_json(paths::COMMITTED, &committed)
                .await?;
            persisted.committed = committed;
            debug!(snapshot_id = committed.snapshot_id, "committed snapshot persisted");
        }
        Ok(())
    }

    async fn run_persister(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush().await {
                        warn!(
                            error = %e,
                            "[{}] failed to persist snapshot progress",
                            error_codes::SNAPSHOT_PERSIST_FAILED
                        );
                    }
                }
            }
        }

        if let Err(e) = self.flush().await {
            warn!(
                error = %e,
                "[{}] final snapshot progress flush failed",
                error_codes::SNAPSHOT_PERSIST_FAILED
            );
        }
    }

    async fn run_ticker(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.increase_write_snapshot_id().await {
                        warn!(
                            error = %e,
                            "[{}] periodic write snapshot advance failed",
                            error_codes::SNAPSHOT_ADVANCE_FAILED
                        );
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SnapshotSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SnapshotSequencer")
            .field("write_snapshot_id", &state.write_snapshot_id)
            .field("committed", &state.committed)
            .field("replicas", &state.replicas.len())
            .field("quorum", &state.quorum)
            .field("listeners", &state.listeners)
            .field("next_listener_target", &state.listeners.lowest_target())
            .finish_non_exhaustive()
    }
}

/// Held write-snapshot lock. The id it reports cannot change while the
/// guard lives.
pub(crate) struct WriteSnapshotGuard<'a> {
    sequencer: &'a SnapshotSequencer,
    reservation: tokio::sync::MutexGuard<'a, IdReservation>,
}

impl WriteSnapshotGuard<'_> {
    /// The write-snapshot id batches appended under this guard carry.
    pub(crate) fn snapshot_id(&self) -> SnapshotId {
        self.sequencer.current_write_snapshot_id()
    }
}
