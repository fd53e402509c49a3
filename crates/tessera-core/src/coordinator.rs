//! # Coordinator Node
//!
//! Wires the sequencer, discovery, schema manager and RPC services of one
//! coordinator from a [`CoordinatorConfig`].
//!
//! Startup order:
//! 1. validate config
//! 2. restore the sequencer from the meta store and start its persister
//! 3. start discovery, with store membership feeding the commit quorum
//! 4. start the schema manager (which begins recovery)
//!
//! Shutdown runs the same steps in reverse.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_storage::MetaStore;
use tracing::info;

use crate::config::{ConfigError, CoordinatorConfig};
use crate::discovery::{ClusterDiscovery, DiscoveryBackend, DiscoveryError};
use crate::oplog::{BatchWriter, OperationLog};
use crate::rpc::{CommitService, IngestProgressService};
use crate::schema::{DdlExecutor, GraphDefFetcher, SchemaManager};
use crate::snapshot::{SequencerError, SnapshotSequencer, StoreQuorumListener};

/// Lifecycle phase of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeLifecyclePhase {
    /// Components are running; schema recovery has not finished.
    RecoveringSchema,
    /// Accepting DDL.
    Active,
    /// Shutting down.
    Stopping,
    /// Stopped.
    Stopped,
}

impl fmt::Display for NodeLifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecoveringSchema => write!(f, "recovering-schema"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Errors from coordinator startup.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The sequencer could not be restored.
    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    /// Discovery failed to start.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// External collaborators of a coordinator.
pub struct CoordinatorComponents {
    /// Durable store for sequencer recovery state.
    pub meta_store: Arc<dyn MetaStore>,
    /// Coordination service for membership.
    pub discovery_backend: Arc<dyn DiscoveryBackend>,
    /// Operation log replicas consume.
    pub log: Arc<dyn OperationLog>,
    /// DDL translation.
    pub executor: Arc<dyn DdlExecutor>,
    /// Source of the persisted schema during recovery.
    pub fetcher: Arc<dyn GraphDefFetcher>,
}

/// A running coordinator.
pub struct CoordinatorNode {
    config: CoordinatorConfig,
    sequencer: Arc<SnapshotSequencer>,
    discovery: Arc<ClusterDiscovery>,
    schema: Arc<SchemaManager>,
    writer: BatchWriter,
    stopping: Mutex<Option<NodeLifecyclePhase>>,
}

impl CoordinatorNode {
    /// Build and start every component.
    ///
    /// Returns once the sequencer is restored and discovery is primed;
    /// schema recovery continues in the background (see
    /// [`phase`](Self::phase)).
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] if the config is invalid, sequencer
    /// state cannot be restored, or discovery fails to start. Components
    /// started before the failure are stopped again.
    pub async fn start(
        config: CoordinatorConfig,
        parts: CoordinatorComponents,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;

        let sequencer = SnapshotSequencer::open(config.sequencer.clone(), parts.meta_store).await?;
        sequencer.start();

        let discovery = Arc::new(ClusterDiscovery::new(
            config.discovery.clone(),
            parts.discovery_backend,
        ));
        discovery.add_listener(Arc::new(StoreQuorumListener::new(Arc::clone(&sequencer))));
        if let Err(e) = discovery.start().await {
            discovery.stop().await;
            sequencer.stop().await;
            return Err(e.into());
        }

        let writer = BatchWriter::new(Arc::clone(&sequencer), parts.log);
        let schema = Arc::new(SchemaManager::new(
            config.schema.clone(),
            writer.clone(),
            parts.executor,
            parts.fetcher,
        ));
        schema.start();

        info!(
            role = %config.discovery.role,
            node_index = config.discovery.node_index,
            write_snapshot_id = sequencer.current_write_snapshot_id(),
            committed = sequencer.committed().snapshot_id,
            "coordinator started"
        );

        Ok(Self {
            config,
            sequencer,
            discovery,
            schema,
            writer,
            stopping: Mutex::new(None),
        })
    }

    /// Stop every component in reverse start order and persist final
    /// sequencer progress. Idempotent.
    pub async fn stop(&self) {
        {
            let mut stopping = self.stopping.lock();
            if stopping.is_some() {
                return;
            }
            *stopping = Some(NodeLifecyclePhase::Stopping);
        }
        self.schema.stop().await;
        self.discovery.stop().await;
        self.sequencer.stop().await;
        *self.stopping.lock() = Some(NodeLifecyclePhase::Stopped);
        info!("coordinator stopped");
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> NodeLifecyclePhase {
        if let Some(phase) = *self.stopping.lock() {
            return phase;
        }
        if self.schema.is_ready() {
            NodeLifecyclePhase::Active
        } else {
            NodeLifecyclePhase::RecoveringSchema
        }
    }

    /// Configuration the node was started with.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The snapshot sequencer.
    #[must_use]
    pub fn sequencer(&self) -> &Arc<SnapshotSequencer> {
        &self.sequencer
    }

    /// Cluster discovery.
    #[must_use]
    pub fn discovery(&self) -> &Arc<ClusterDiscovery> {
        &self.discovery
    }

    /// The schema manager.
    #[must_use]
    pub fn schema_manager(&self) -> &Arc<SchemaManager> {
        &self.schema
    }

    /// Batch writer for data ingestion.
    #[must_use]
    pub fn batch_writer(&self) -> &BatchWriter {
        &self.writer
    }

    /// Handler for store progress reports.
    #[must_use]
    pub fn commit_service(&self) -> CommitService {
        CommitService::new(Arc::clone(&self.sequencer))
    }

    /// Handler for ingestor tail-offset queries.
    #[must_use]
    pub fn ingest_progress_service(&self) -> IngestProgressService {
        IngestProgressService::new(Arc::clone(&self.sequencer))
    }
}

impl fmt::Debug for CoordinatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorNode")
            .field("phase", &self.phase())
            .field("sequencer", &self.sequencer)
            .field("discovery", &self.discovery)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
