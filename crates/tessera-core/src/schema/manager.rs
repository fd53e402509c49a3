//! Serial DDL orchestrator.
//!
//! One task owns all schema work. Commands are processed strictly in
//! order:
//! - `Recover`: barrier id, wait for commit, fetch, publish, READY
//! - `Submit`: apply DDL, append under the write-snapshot lock, wait for
//!   commit, publish

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ddl::{DdlExecutor, DdlRequestBatch};
use super::{GraphDef, GraphDefFetcher, SchemaError};
use crate::config::SchemaConfig;
use crate::error_codes;
use crate::oplog::BatchWriter;
use crate::snapshot::SnapshotId;

/// Commands processed by the schema worker.
enum SchemaCommand {
    /// Re-establish the published schema from the stores.
    Recover,
    /// Apply and commit a DDL batch.
    Submit {
        request_id: String,
        session_id: String,
        batch: DdlRequestBatch,
        ack: oneshot::Sender<Result<SnapshotId, SchemaError>>,
    },
}

struct Shared {
    config: SchemaConfig,
    writer: BatchWriter,
    executor: Arc<dyn DdlExecutor>,
    fetcher: Arc<dyn GraphDefFetcher>,
    graph_def: ArcSwapOption<GraphDef>,
    ready: AtomicBool,
    tx: mpsc::UnboundedSender<SchemaCommand>,
}

impl Shared {
    async fn handle(&self, command: SchemaCommand) {
        match command {
            SchemaCommand::Recover => self.recover().await,
            SchemaCommand::Submit {
                request_id,
                session_id,
                batch,
                ack,
            } => {
                let result = self.submit(&request_id, &session_id, &batch).await;
                if let Err(e) = &result {
                    if !matches!(e, SchemaError::NotReady) {
                        self.enter_recovery();
                        warn!(
                            request_id = %request_id,
                            session_id = %session_id,
                            error = %e,
                            "[{}] DDL batch failed; schema manager recovering",
                            error_codes::DDL_FAILED
                        );
                    }
                }
                let _ = ack.send(result);
            }
        }
    }

    fn enter_recovery(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let _ = self.tx.send(SchemaCommand::Recover);
    }

    async fn recover(&self) {
        if self.ready.load(Ordering::SeqCst) {
            return;
        }
        match self.fetch_after_barrier().await {
            Ok((barrier, graph_def)) => {
                info!(
                    barrier,
                    version = graph_def.version(),
                    "schema recovered; manager ready"
                );
                self.graph_def.store(Some(Arc::new(graph_def)));
                self.ready.store(true, Ordering::SeqCst);
            }
            Err(e) => {
                let backoff = self.config.recovery_backoff();
                warn!(
                    error = %e,
                    retry_in_ms = self.config.recovery_backoff_ms,
                    "[{}] schema recovery failed",
                    error_codes::SCHEMA_RECOVERY_FAILED
                );
                tokio::time::sleep(backoff).await;
                let _ = self.tx.send(SchemaCommand::Recover);
            }
        }
    }

    /// Wait until every batch tagged before a fresh barrier id is committed,
    /// then read the schema the stores persisted.
    async fn fetch_after_barrier(&self) -> Result<(SnapshotId, GraphDef), SchemaError> {
        let sequencer = self.writer.sequencer();
        let barrier = sequencer.increase_write_snapshot_id().await?;
        debug!(barrier, "waiting for recovery barrier to commit");
        sequencer.wait_committed(barrier).await?;
        let graph_def = self.fetcher.fetch_graph_def().await?;
        Ok((barrier, graph_def))
    }

    async fn submit(
        &self,
        request_id: &str,
        session_id: &str,
        batch: &DdlRequestBatch,
    ) -> Result<SnapshotId, SchemaError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(SchemaError::NotReady);
        }
        let current = self.graph_def.load_full().ok_or(SchemaError::NotReady)?;

        let result = self
            .executor
            .apply_ddl(batch, &current, self.config.partition_count)?;
        let expected = current.version() + 1;
        if result.graph_def.version() != expected {
            return Err(SchemaError::VersionMismatch {
                expected,
                actual: result.graph_def.version(),
            });
        }

        let batch_id = self.writer.write(request_id, result.operations).await?;
        self.writer
            .sequencer()
            .wait_committed(batch_id.snapshot_id)
            .await?;

        self.graph_def.store(Some(Arc::new(result.graph_def)));
        info!(
            request_id,
            session_id,
            snapshot_id = batch_id.snapshot_id,
            version = expected,
            requests = batch.requests.len(),
            "DDL batch committed"
        );
        Ok(batch_id.snapshot_id)
    }
}

/// Orchestrates DDL submission and schema recovery on one serial worker.
pub struct SchemaManager {
    shared: Arc<Shared>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<SchemaCommand>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SchemaManager {
    /// Create a manager in the RECOVERING state. Nothing runs until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(
        config: SchemaConfig,
        writer: BatchWriter,
        executor: Arc<dyn DdlExecutor>,
        fetcher: Arc<dyn GraphDefFetcher>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config,
                writer,
                executor,
                fetcher,
                graph_def: ArcSwapOption::empty(),
                ready: AtomicBool::new(false),
                tx,
            }),
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the worker and queue the initial recovery. Calling it again is
    /// a no-op.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };
        let _ = self.shared.tx.send(SchemaCommand::Recover);
        let task = tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            rx,
            self.cancel.clone(),
        ));
        *self.task.lock() = Some(task);
        debug!("schema worker started");
    }

    /// Stop the worker. Queued and in-flight requests resolve with
    /// [`SchemaError::Shutdown`].
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.shared.ready.store(false, Ordering::SeqCst);
    }

    /// Whether the manager accepts DDL.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    /// The published schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotReady`] while recovering.
    pub fn get_graph_def(&self) -> Result<Arc<GraphDef>, SchemaError> {
        if !self.is_ready() {
            return Err(SchemaError::NotReady);
        }
        self.shared.graph_def.load_full().ok_or(SchemaError::NotReady)
    }

    /// Submit a DDL batch and wait until it is committed and published.
    ///
    /// Returns the snapshot id the batch was committed at. Dropping the
    /// returned future does not withdraw the request; re-read
    /// [`get_graph_def`](Self::get_graph_def) to learn the outcome.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::NotReady`] immediately if the manager is recovering
    /// - [`SchemaError::Shutdown`] if the manager stops first
    /// - any error from validation, the log, or the sequencer; the manager
    ///   then recovers before accepting more DDL
    pub async fn submit_batch_ddl(
        &self,
        request_id: &str,
        session_id: &str,
        batch: DdlRequestBatch,
    ) -> Result<SnapshotId, SchemaError> {
        if !self.is_ready() {
            return Err(SchemaError::NotReady);
        }
        let (ack, rx) = oneshot::channel();
        self.shared
            .tx
            .send(SchemaCommand::Submit {
                request_id: request_id.to_string(),
                session_id: session_id.to_string(),
                batch,
                ack,
            })
            .map_err(|_| SchemaError::Shutdown)?;
        rx.await.map_err(|_| SchemaError::Shutdown)?
    }
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("ready", &self.is_ready())
            .field(
                "version",
                &self.shared.graph_def.load_full().map(|g| g.version()),
            )
            .field("partitions", &self.shared.config.partition_count)
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<SchemaCommand>,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = cancel.cancelled() => break,
            command = rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = shared.handle(command) => {}
        }
    }
    debug!("schema worker exited");
}
