//! Crash between "DDL appended to the log" and "schema published".
//!
//! The restarted coordinator must converge to exactly the schema an
//! uninterrupted run produces, and must never reuse a snapshot id.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{social_schema, vertex, wait_ready, FakeStore};
use tessera_core::oplog::{BatchWriter, InMemoryOperationLog};
use tessera_core::schema::{
    GraphDef, GraphDefDdlExecutor, InMemoryGraphDefFetcher, SchemaError, SchemaManager,
};
use tessera_core::{SchemaConfig, SequencerConfig, SnapshotSequencer};
use tessera_storage::{FileMetaStore, MetaStore};

fn sequencer_config() -> SequencerConfig {
    SequencerConfig {
        store_count: Some(1),
        id_reservation: 16,
        snapshot_increase_interval_ms: Some(5),
        ..SequencerConfig::default()
    }
}

fn manager(
    sequencer: &Arc<SnapshotSequencer>,
    log: &Arc<InMemoryOperationLog>,
    fetcher: &Arc<InMemoryGraphDefFetcher>,
) -> SchemaManager {
    SchemaManager::new(
        SchemaConfig {
            partition_count: 2,
            recovery_backoff_ms: 10,
        },
        BatchWriter::new(Arc::clone(sequencer), log.clone()),
        Arc::new(GraphDefDdlExecutor),
        fetcher.clone(),
    )
}

/// Apply every batch of the social schema without interruption.
async fn uninterrupted() -> GraphDef {
    let dir = tempfile::tempdir().unwrap();
    let meta: Arc<dyn MetaStore> = Arc::new(FileMetaStore::new(dir.path()));
    let seq = SnapshotSequencer::open(sequencer_config(), meta).await.unwrap();
    seq.start();
    let log = Arc::new(InMemoryOperationLog::new());
    let fetcher = Arc::new(InMemoryGraphDefFetcher::default());
    let tokens = FakeStore::start_all(1, &log, &fetcher, &seq);

    let m = manager(&seq, &log, &fetcher);
    m.start();
    wait_ready(&m).await;
    for batch in social_schema() {
        m.submit_batch_ddl("r", "s", batch).await.unwrap();
    }
    let def = (*m.get_graph_def().unwrap()).clone();

    for token in tokens {
        token.cancel();
    }
    m.stop().await;
    seq.stop().await;
    def
}

#[tokio::test]
async fn test_restart_after_unpublished_ddl_matches_uninterrupted_run() {
    let expected = uninterrupted().await;
    let batches = social_schema();

    let dir = tempfile::tempdir().unwrap();
    let meta: Arc<dyn MetaStore> = Arc::new(FileMetaStore::new(dir.path()));
    let log = Arc::new(InMemoryOperationLog::new());
    let fetcher = Arc::new(InMemoryGraphDefFetcher::default());
    let store = FakeStore::publishing(0, log.clone(), fetcher.clone());

    // First life: the first three batches commit normally.
    let seq = SnapshotSequencer::open(sequencer_config(), Arc::clone(&meta))
        .await
        .unwrap();
    seq.start();
    let replica = store.spawn(Arc::clone(&seq));
    let m = Arc::new(manager(&seq, &log, &fetcher));
    m.start();
    wait_ready(&m).await;
    for batch in &batches[..3] {
        m.submit_batch_ddl("r", "s", batch.clone()).await.unwrap();
    }

    // The store goes quiet, the last batch reaches the log but never
    // commits, and the coordinator dies before publishing.
    replica.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let log_len = log.len();
    let pending = {
        let m = Arc::clone(&m);
        let batch = batches[3].clone();
        tokio::spawn(async move { m.submit_batch_ddl("r", "s", batch).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.len() == log_len {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    let unpublished_tag = log.entries().last().unwrap().batch_id.snapshot_id;
    assert_eq!(m.get_graph_def().unwrap().version(), 3);

    m.stop().await;
    assert!(matches!(pending.await.unwrap(), Err(SchemaError::Shutdown)));
    seq.flush().await.unwrap();
    seq.stop().await;
    drop(seq);

    // Second life: the store catches up on the log, recovery publishes
    // the schema it persisted.
    let seq = SnapshotSequencer::open(sequencer_config(), meta).await.unwrap();
    assert!(seq.current_write_snapshot_id() > unpublished_tag);
    seq.start();
    let replica = store.spawn(Arc::clone(&seq));
    let m = manager(&seq, &log, &fetcher);
    m.start();
    wait_ready(&m).await;

    let recovered = m.get_graph_def().unwrap();
    assert_eq!(*recovered, expected);
    assert_eq!(recovered.version(), 4);

    // Recovering again is a no-op for the schema.
    m.stop().await;
    let m = manager(&seq, &log, &fetcher);
    m.start();
    wait_ready(&m).await;
    assert_eq!(*m.get_graph_def().unwrap(), expected);

    // And DDL continues from there.
    m.submit_batch_ddl("r", "s", vertex("city")).await.unwrap();
    assert_eq!(m.get_graph_def().unwrap().version(), 5);

    replica.cancel();
    m.stop().await;
    seq.stop().await;
}
