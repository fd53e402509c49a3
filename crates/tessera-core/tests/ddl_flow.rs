//! End-to-end DDL through a running coordinator: stores discovered through
//! the registry, progress reported over the commit endpoint, schema
//! published only after the DDL batch commits.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{social_schema, vertex, wait_ready, FakeStore};
use object_store::memory::InMemory;
use tessera_core::discovery::{DiscoveryBackend, MemoryRegistry, NodeAddress, RoleType};
use tessera_core::oplog::{InMemoryOperationLog, Operation, OperationType};
use tessera_core::rpc::GetTailOffsetsRequest;
use tessera_core::schema::{DdlOperation, GraphDefDdlExecutor, InMemoryGraphDefFetcher, SchemaError};
use tessera_core::{
    CoordinatorComponents, CoordinatorConfig, CoordinatorNode, NodeLifecyclePhase, SequencerConfig,
};
use tessera_storage::ObjectStoreMetaStore;

struct Cluster {
    node: CoordinatorNode,
    log: Arc<InMemoryOperationLog>,
    fetcher: Arc<InMemoryGraphDefFetcher>,
}

async fn cluster(partitions: u32) -> Cluster {
    let registry = Arc::new(MemoryRegistry::new("/tessera"));
    for index in 0..2 {
        registry
            .register(RoleType::Store, index, &NodeAddress::new(format!("store-{index}"), 7000))
            .await
            .unwrap();
    }

    let log = Arc::new(InMemoryOperationLog::new());
    let fetcher = Arc::new(InMemoryGraphDefFetcher::default());
    let mut config = CoordinatorConfig {
        sequencer: SequencerConfig {
            store_count: Some(2),
            persist_interval_ms: 20,
            snapshot_increase_interval_ms: Some(5),
            ..SequencerConfig::default()
        },
        ..CoordinatorConfig::default()
    };
    config.schema.partition_count = partitions;

    let node = CoordinatorNode::start(
        config,
        CoordinatorComponents {
            meta_store: Arc::new(ObjectStoreMetaStore::new(Arc::new(InMemory::new()), "coordinator")),
            discovery_backend: registry,
            log: log.clone(),
            executor: Arc::new(GraphDefDdlExecutor),
            fetcher: fetcher.clone(),
        },
    )
    .await
    .unwrap();

    Cluster { node, log, fetcher }
}

#[tokio::test]
async fn test_ddl_published_after_both_stores_commit() {
    let c = cluster(3).await;
    let seq = Arc::clone(c.node.sequencer());
    let publisher = FakeStore::publishing(0, c.log.clone(), c.fetcher.clone());
    let follower = FakeStore::new(1, c.log.clone());

    // Only store 0 runs: recovery cannot finish without store 1.
    let first = publisher.spawn(Arc::clone(&seq));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(c.node.phase(), NodeLifecyclePhase::RecoveringSchema);

    let second = follower.spawn(Arc::clone(&seq));
    wait_ready(c.node.schema_manager()).await;
    assert_eq!(c.node.phase(), NodeLifecyclePhase::Active);

    let manager = c.node.schema_manager();
    for (i, batch) in social_schema().into_iter().enumerate() {
        let snapshot_id = manager
            .submit_batch_ddl(&format!("req-{i}"), "session-1", batch)
            .await
            .unwrap();
        assert!(seq.committed().snapshot_id >= snapshot_id);
    }

    let def = manager.get_graph_def().unwrap();
    assert_eq!(def.version(), 4);
    assert_eq!(def.vertex_types().count(), 2);
    assert_eq!(def.edge_kinds().count(), 2);

    // Both stores reached the same schema from the log.
    assert_eq!(*def, c.fetcher.current());
    assert_eq!(*def, follower.schema());

    // Every DDL batch fans out to each partition.
    let ddl_ops: Vec<Operation> = c
        .log
        .entries()
        .into_iter()
        .flat_map(|e| e.batch.operations)
        .filter(|op| op.op_type.is_ddl())
        .collect();
    assert_eq!(ddl_ops.len(), 6 * 3);
    assert!(ddl_ops.iter().all(|op| op.partition_id.is_some()));
    assert_eq!(
        ddl_ops
            .iter()
            .filter(|op| op.op_type == OperationType::AddEdgeKind)
            .count(),
        2 * 3
    );

    first.cancel();
    second.cancel();
    c.node.stop().await;
}

#[tokio::test]
async fn test_concurrent_submissions_get_contiguous_versions() {
    let c = cluster(1).await;
    let seq = Arc::clone(c.node.sequencer());
    let tokens = FakeStore::start_all(2, &c.log, &c.fetcher, &seq);
    wait_ready(c.node.schema_manager()).await;

    let manager = Arc::clone(c.node.schema_manager());
    let submissions = (0..8).map(|i| {
        let manager = Arc::clone(&manager);
        async move {
            manager
                .submit_batch_ddl(&format!("req-{i}"), "session", vertex(&format!("v{i}")))
                .await
        }
    });
    let results = futures::future::join_all(submissions).await;
    let mut snapshot_ids: Vec<u64> = results.into_iter().map(Result::unwrap).collect();
    snapshot_ids.sort_unstable();
    snapshot_ids.dedup();
    assert_eq!(snapshot_ids.len(), 8, "each batch committed at its own snapshot");
    assert_eq!(manager.get_graph_def().unwrap().version(), 8);

    // Versions in log order are 1..=8: batches were built one at a time.
    let versions: Vec<u64> = c
        .log
        .entries()
        .iter()
        .flat_map(|e| e.batch.operations.iter())
        .filter(|op| op.op_type.is_ddl())
        .map(|op| DdlOperation::decode(op).unwrap().schema_version)
        .collect();
    assert_eq!(versions, (1..=8).collect::<Vec<_>>());

    for token in tokens {
        token.cancel();
    }
    c.node.stop().await;
}

#[tokio::test]
async fn test_data_writes_share_the_snapshot_order() {
    let c = cluster(1).await;
    let seq = Arc::clone(c.node.sequencer());
    let tokens = FakeStore::start_all(2, &c.log, &c.fetcher, &seq);
    wait_ready(c.node.schema_manager()).await;

    let writer = c.node.batch_writer().clone();
    let ingest = tokio::spawn(async move {
        for i in 0..50u32 {
            writer
                .write(
                    &format!("data-{i}"),
                    vec![Operation::new(OperationType::OverwriteVertex, Some(0), vec![1u8, 2, 3])],
                )
                .await
                .unwrap();
        }
    });
    for batch in social_schema() {
        c.node
            .schema_manager()
            .submit_batch_ddl("ddl", "s", batch)
            .await
            .unwrap();
    }
    ingest.await.unwrap();

    let tags: Vec<u64> = c.log.entries().iter().map(|e| e.batch_id.snapshot_id).collect();
    assert!(tags.windows(2).all(|w| w[0] <= w[1]), "log order is snapshot order");

    let expected = Some(c.log.len() as u64);
    let progress = c.node.ingest_progress_service();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let offsets = progress
                .get_tail_offsets(GetTailOffsetsRequest { queue_ids: vec![0] })
                .await;
            if offsets.offsets == vec![expected] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("both stores report the whole log as applied");

    for token in tokens {
        token.cancel();
    }
    c.node.stop().await;
}

#[tokio::test]
async fn test_invalid_ddl_reported_and_manager_recovers() {
    let c = cluster(1).await;
    let seq = Arc::clone(c.node.sequencer());
    let tokens = FakeStore::start_all(2, &c.log, &c.fetcher, &seq);
    let manager = c.node.schema_manager();
    wait_ready(manager).await;

    manager.submit_batch_ddl("a", "s", vertex("person")).await.unwrap();
    let err = manager
        .submit_batch_ddl("b", "s", vertex("person"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchemaError::Ddl(_)));

    wait_ready(manager).await;
    assert_eq!(manager.get_graph_def().unwrap().version(), 1);
    manager.submit_batch_ddl("c", "s", vertex("city")).await.unwrap();
    assert_eq!(manager.get_graph_def().unwrap().version(), 2);

    for token in tokens {
        token.cancel();
    }
    c.node.stop().await;
}
