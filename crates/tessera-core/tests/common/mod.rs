//! Shared fixtures for coordinator integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_core::oplog::InMemoryOperationLog;
use tessera_core::schema::{
    DataType, DdlOperation, DdlRequestBatch, GraphDef, InMemoryGraphDefFetcher, PropertySpec,
};
use tessera_core::{SchemaManager, SnapshotSequencer};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Applied {
    next_offset: u64,
    ddl_snapshot_id: u64,
    schema: GraphDef,
}

/// A store replica that consumes the in-memory log.
///
/// It applies partition-0 DDL to its own copy of the schema and reports
/// every snapshot strictly below the current write id, the way a real
/// store reports closed snapshots. It never advances the id itself; the
/// sequencer's ticker does. All batches tagged below that id are already
/// in the log, because the id only advances once the write-snapshot lock
/// is free. A publishing store also writes its schema to the fetcher the
/// coordinator recovers from.
pub struct FakeStore {
    pub store_id: u32,
    log: Arc<InMemoryOperationLog>,
    publish_to: Option<Arc<InMemoryGraphDefFetcher>>,
    applied: Mutex<Applied>,
}

impl FakeStore {
    pub fn new(store_id: u32, log: Arc<InMemoryOperationLog>) -> Arc<Self> {
        Arc::new(Self {
            store_id,
            log,
            publish_to: None,
            applied: Mutex::new(Applied::default()),
        })
    }

    pub fn publishing(
        store_id: u32,
        log: Arc<InMemoryOperationLog>,
        fetcher: Arc<InMemoryGraphDefFetcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store_id,
            log,
            publish_to: Some(fetcher),
            applied: Mutex::new(Applied::default()),
        })
    }

    pub fn schema(&self) -> GraphDef {
        self.applied.lock().schema.clone()
    }

    /// Start `count` stores with ids `0..count`; store 0 publishes.
    pub fn start_all(
        count: u32,
        log: &Arc<InMemoryOperationLog>,
        fetcher: &Arc<InMemoryGraphDefFetcher>,
        sequencer: &Arc<SnapshotSequencer>,
    ) -> Vec<CancellationToken> {
        (0..count)
            .map(|id| {
                let store = if id == 0 {
                    Self::publishing(id, Arc::clone(log), Arc::clone(fetcher))
                } else {
                    Self::new(id, Arc::clone(log))
                };
                store.spawn(Arc::clone(sequencer))
            })
            .collect()
    }

    /// Apply whatever is new in the log and report progress once.
    pub fn step(&self, sequencer: &SnapshotSequencer) {
        let write_id = sequencer.current_write_snapshot_id();
        let (ddl_snapshot_id, offset) = {
            let mut applied = self.applied.lock();
            for entry in self.log.entries_from(applied.next_offset) {
                applied.next_offset = entry.batch_id.log_offset + 1;
                for op in &entry.batch.operations {
                    if op.op_type.is_ddl() && op.partition_id == Some(0) {
                        let decoded = DdlOperation::decode(op).unwrap();
                        applied.schema = applied.schema.apply_operation(&decoded).unwrap();
                        applied.ddl_snapshot_id = entry.batch_id.snapshot_id;
                        if let Some(fetcher) = &self.publish_to {
                            fetcher.set(applied.schema.clone());
                        }
                    }
                }
            }
            (applied.ddl_snapshot_id, applied.next_offset)
        };
        sequencer.commit_snapshot_id(self.store_id, write_id - 1, ddl_snapshot_id, &[offset]);
    }

    /// Keep stepping until cancelled.
    pub fn spawn(self: &Arc<Self>, sequencer: Arc<SnapshotSequencer>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let store = Arc::clone(self);
        tokio::spawn(async move {
            while !token.is_cancelled() {
                store.step(&sequencer);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });
        cancel
    }
}

pub async fn wait_ready(manager: &SchemaManager) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !manager.is_ready() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("schema manager never became ready");
}

pub fn vertex(label: &str) -> DdlRequestBatch {
    DdlRequestBatch::new().create_vertex_type(
        label,
        vec![
            PropertySpec::primary_key("id", DataType::Long),
            PropertySpec::new("name", DataType::String),
        ],
    )
}

pub fn social_schema() -> Vec<DdlRequestBatch> {
    vec![
        vertex("person"),
        vertex("software"),
        DdlRequestBatch::new()
            .create_edge_type("knows", vec![PropertySpec::new("weight", DataType::Double)])
            .add_edge_kind("knows", "person", "person"),
        DdlRequestBatch::new()
            .create_edge_type("created", vec![])
            .add_edge_kind("created", "person", "software"),
    ]
}
