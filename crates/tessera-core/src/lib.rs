//! # Tessera Core
//!
//! Coordinator-side consistency core of the Tessera graph store.
//!
//! Schema changes must reach every storage partition in one globally
//! agreed order while data ingestion keeps flowing. This crate provides the
//! pieces that make that possible:
//!
//! - [`snapshot`]: the write-snapshot sequencer shared by data and DDL
//!   batches, and the per-replica commit watermark
//! - [`oplog`]: the operation log contract and the batch writer that tags
//!   batches under the write-snapshot lock
//! - [`schema`]: the graph schema model and the serial DDL orchestrator
//! - [`discovery`]: role-based cluster membership with delta listeners
//! - [`rpc`]: the commit / ingest-progress endpoints used by replicas
//! - [`coordinator`]: wiring of all of the above into one node
//!
//! ```text
//! DDL ──► SchemaManager ──► BatchWriter ──► OperationLog
//!              ▲                 │
//!              │          SnapshotSequencer ◄── CommitService ◄── stores
//!              └── commit ───────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error_codes;
pub mod oplog;
pub mod rpc;
pub mod schema;
pub mod snapshot;

pub use config::{CoordinatorConfig, SchemaConfig, SequencerConfig};
pub use coordinator::{CoordinatorComponents, CoordinatorError, CoordinatorNode, NodeLifecyclePhase};
pub use oplog::{BatchId, BatchWriter, Operation, OperationBatch, OperationLog};
pub use schema::{GraphDef, SchemaError, SchemaManager};
pub use snapshot::{CommittedSnapshot, SnapshotId, SnapshotSequencer};
