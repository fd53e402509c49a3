//! Membership view and delta dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    diff, BackendState, DiscoveryBackend, DiscoveryError, MembershipTable, NodeDiscoveryListener,
    RoleNodes, RoleType,
};
use crate::config::DiscoveryConfig;
use crate::error_codes;

#[derive(Debug)]
enum ListenerEvent {
    Joined(RoleType, RoleNodes),
    Left(RoleType, RoleNodes),
    State(BackendState),
}

struct ListenerHandle {
    tx: mpsc::UnboundedSender<ListenerEvent>,
    task: JoinHandle<()>,
}

struct Shared {
    table: ArcSwap<MembershipTable>,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl Shared {
    /// Fold a new view of one role into the table and fan out the delta.
    ///
    /// Runs under the listener lock so that a concurrently added listener
    /// sees either the old table plus this delta, or the new table.
    fn apply_change(&self, role: RoleType, nodes: RoleNodes) {
        let listeners = self.listeners.lock();
        let current = self.table.load();
        let empty = RoleNodes::new();
        let (added, removed) = diff(current.get(&role).unwrap_or(&empty), &nodes);
        if added.is_empty() && removed.is_empty() {
            return;
        }

        let mut next = MembershipTable::clone(&current);
        next.insert(role, nodes);
        self.table.store(Arc::new(next));

        info!(
            %role,
            joined = added.len(),
            left = removed.len(),
            "membership changed"
        );
        for handle in listeners.iter() {
            if !removed.is_empty() {
                let _ = handle.tx.send(ListenerEvent::Left(role, removed.clone()));
            }
            if !added.is_empty() {
                let _ = handle.tx.send(ListenerEvent::Joined(role, added.clone()));
            }
        }
    }

    fn broadcast_state(&self, state: BackendState) {
        for handle in self.listeners.lock().iter() {
            let _ = handle.tx.send(ListenerEvent::State(state));
        }
    }
}

/// Eventually consistent view of live nodes per role.
///
/// [`start`](Self::start) registers the local node and primes the
/// membership table from the backend before returning. Changes after that
/// are applied by a background worker and delivered to listeners as
/// deltas.
pub struct ClusterDiscovery {
    config: DiscoveryConfig,
    backend: Arc<dyn DiscoveryBackend>,
    shared: Arc<Shared>,
    started: AtomicBool,
    stopped: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterDiscovery {
    /// Create a discovery instance for the local node described by
    /// `config`. Nothing happens until [`start`](Self::start).
    #[must_use]
    pub fn new(config: DiscoveryConfig, backend: Arc<dyn DiscoveryBackend>) -> Self {
        Self {
            config,
            backend,
            shared: Arc::new(Shared {
                table: ArcSwap::from_pointee(MembershipTable::new()),
                listeners: Mutex::new(Vec::new()),
            }),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register the local node and start watching the configured roles.
    ///
    /// Calling it again after a successful start is a no-op. A stopped
    /// instance cannot be restarted.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Startup`] if registration or any watch
    /// fails. The local registration is rolled back in that case.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Startup(Box::new(DiscoveryError::Backend(
                "discovery already stopped".into(),
            ))));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self.start_inner().await;
        if let Err(e) = &result {
            self.started.store(false, Ordering::SeqCst);
            warn!(error = %e, "discovery startup failed");
        }
        result.map_err(|e| DiscoveryError::Startup(Box::new(e)))
    }

    async fn start_inner(&self) -> Result<(), DiscoveryError> {
        let role = self.config.role;
        let index = self.config.node_index;
        self.backend
            .register(role, index, &self.config.address)
            .await?;

        let mut watches = Vec::with_capacity(self.config.watched_roles.len());
        for &watched in &self.config.watched_roles {
            match self.backend.watch(watched).await {
                Ok(rx) => watches.push((watched, rx)),
                Err(e) => {
                    let _ = self.backend.deregister(role, index).await;
                    return Err(e);
                }
            }
        }

        for (watched, rx) in &mut watches {
            let initial = rx.borrow_and_update().clone();
            self.shared.apply_change(*watched, initial);
        }

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock();
        for (watched, rx) in watches {
            tasks.push(tokio::spawn(forward_role(
                watched,
                rx,
                change_tx.clone(),
                self.cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(run_change_worker(
            Arc::clone(&self.shared),
            change_rx,
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(watch_backend_state(
            Arc::clone(&self.shared),
            self.backend.state(),
            self.cancel.clone(),
        )));

        info!(
            %role,
            index,
            address = %self.config.address,
            watched = self.config.watched_roles.len(),
            "cluster discovery started"
        );
        Ok(())
    }

    /// Close all watches, deregister the local node and clear the table.
    ///
    /// Pending deltas already queued for listeners are still delivered.
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        if self.started.load(Ordering::SeqCst) {
            if let Err(e) = self
                .backend
                .deregister(self.config.role, self.config.node_index)
                .await
            {
                warn!(
                    error = %e,
                    "[{}] failed to deregister local node",
                    error_codes::DISCOVERY_DEREGISTER_FAILED
                );
            }
        }

        let handles: Vec<_> = {
            let mut listeners = self.shared.listeners.lock();
            self.shared.table.store(Arc::new(MembershipTable::new()));
            listeners.drain(..).collect()
        };
        for handle in handles {
            drop(handle.tx);
            let _ = handle.task.await;
        }
        info!("cluster discovery stopped");
    }

    /// Subscribe to membership deltas.
    ///
    /// The listener first receives the current membership as joins, then
    /// every later delta, in order.
    pub fn add_listener(&self, listener: Arc<dyn NodeDiscoveryListener>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self.shared.listeners.lock();
        let table = self.shared.table.load();
        for role in RoleType::ALL {
            if let Some(nodes) = table.get(&role).filter(|nodes| !nodes.is_empty()) {
                let _ = tx.send(ListenerEvent::Joined(role, nodes.clone()));
            }
        }
        let task = tokio::spawn(dispatch_to_listener(listener, rx));
        listeners.push(ListenerHandle { tx, task });
        debug!(listeners = listeners.len(), "discovery listener added");
    }

    /// Snapshot of the full membership table.
    #[must_use]
    pub fn membership(&self) -> Arc<MembershipTable> {
        self.shared.table.load_full()
    }

    /// Current nodes of one role.
    #[must_use]
    pub fn nodes(&self, role: RoleType) -> RoleNodes {
        self.shared
            .table
            .load()
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether [`start`](Self::start) succeeded and [`stop`](Self::stop)
    /// has not been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ClusterDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDiscovery")
            .field("role", &self.config.role)
            .field("node_index", &self.config.node_index)
            .field("running", &self.is_running())
            .field("roles", &self.shared.table.load().len())
            .finish_non_exhaustive()
    }
}

async fn forward_role(
    role: RoleType,
    mut rx: watch::Receiver<RoleNodes>,
    tx: mpsc::UnboundedSender<(RoleType, RoleNodes)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!(%role, "membership watch closed");
                    break;
                }
                let nodes = rx.borrow_and_update().clone();
                if tx.send((role, nodes)).is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_change_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<(RoleType, RoleNodes)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            change = rx.recv() => match change {
                Some((role, nodes)) => shared.apply_change(role, nodes),
                None => break,
            },
        }
    }
}

async fn watch_backend_state(
    shared: Arc<Shared>,
    mut rx: watch::Receiver<BackendState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *rx.borrow_and_update();
                match state {
                    BackendState::Suspended | BackendState::Lost => warn!(
                        %state,
                        "[{}] discovery backend connection degraded",
                        error_codes::DISCOVERY_BACKEND_DEGRADED
                    ),
                    BackendState::Connected | BackendState::Reconnected => {
                        info!(%state, "discovery backend connection restored");
                    }
                }
                shared.broadcast_state(state);
            }
        }
    }
}

async fn dispatch_to_listener(
    listener: Arc<dyn NodeDiscoveryListener>,
    mut rx: mpsc::UnboundedReceiver<ListenerEvent>,
) {
    while let Some(event) = rx.recv().await {
        let outcome = catch_unwind(AssertUnwindSafe(|| match &event {
            ListenerEvent::Joined(role, nodes) => listener.nodes_joined(*role, nodes),
            ListenerEvent::Left(role, nodes) => listener.nodes_left(*role, nodes),
            ListenerEvent::State(state) => listener.state_changed(*state),
        }));
        if outcome.is_err() {
            warn!(
                ?event,
                "[{}] discovery listener panicked",
                error_codes::DISCOVERY_LISTENER_PANICKED
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{MemoryRegistry, NodeAddress};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }

        async fn wait_for(&self, count: usize) -> Vec<String> {
            for _ in 0..200 {
                if self.events.lock().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.events()
        }
    }

    impl NodeDiscoveryListener for Recorder {
        fn nodes_joined(&self, role: RoleType, nodes: &RoleNodes) {
            for index in nodes.keys() {
                self.events.lock().push(format!("+{role}/{index}"));
            }
        }

        fn nodes_left(&self, role: RoleType, nodes: &RoleNodes) {
            for index in nodes.keys() {
                self.events.lock().push(format!("-{role}/{index}"));
            }
        }

        fn state_changed(&self, state: BackendState) {
            self.events.lock().push(format!("state:{state}"));
        }
    }

    struct Panicker;

    impl NodeDiscoveryListener for Panicker {
        fn nodes_joined(&self, _role: RoleType, _nodes: &RoleNodes) {
            panic!("listener bug");
        }

        fn nodes_left(&self, _role: RoleType, _nodes: &RoleNodes) {}
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            watched_roles: vec![RoleType::Coordinator, RoleType::Store],
            ..DiscoveryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_registers_and_primes() {
        let registry = Arc::new(MemoryRegistry::new("/t"));
        registry
            .register(RoleType::Store, 0, &NodeAddress::new("s0", 1))
            .await
            .unwrap();

        let discovery = ClusterDiscovery::new(config(), registry.clone());
        discovery.start().await.unwrap();
        discovery.start().await.unwrap();

        assert_eq!(discovery.nodes(RoleType::Store).len(), 1);
        assert_eq!(discovery.nodes(RoleType::Coordinator).len(), 1);
        assert!(discovery.is_running());
        discovery.stop().await;
    }

    #[tokio::test]
    async fn test_startup_failure_is_fatal() {
        let registry = Arc::new(MemoryRegistry::new("/t"));
        registry.set_available(false);
        let discovery = ClusterDiscovery::new(config(), registry);
        let err = discovery.start().await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Startup(_)));
        assert!(!discovery.is_running());
    }

    #[tokio::test]
    async fn test_deltas_reach_listener_in_order() {
        let registry = Arc::new(MemoryRegistry::new("/t"));
        let discovery = ClusterDiscovery::new(config(), registry.clone());
        discovery.start().await.unwrap();

        let recorder = Arc::new(Recorder::default());
        discovery.add_listener(recorder.clone());

        registry
            .register(RoleType::Store, 1, &NodeAddress::new("s1", 1))
            .await
            .unwrap();
        let events = recorder.wait_for(2).await;
        assert_eq!(events, vec!["+coordinator/0", "+store/1"]);

        registry.deregister(RoleType::Store, 1).await.unwrap();
        let events = recorder.wait_for(3).await;
        assert_eq!(events[2], "-store/1");
        assert!(discovery.nodes(RoleType::Store).is_empty());
        discovery.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let registry = Arc::new(MemoryRegistry::new("/t"));
        let discovery = ClusterDiscovery::new(config(), registry.clone());
        discovery.start().await.unwrap();

        discovery.add_listener(Arc::new(Panicker));
        let recorder = Arc::new(Recorder::default());
        discovery.add_listener(recorder.clone());

        registry
            .register(RoleType::Store, 4, &NodeAddress::new("s4", 1))
            .await
            .unwrap();
        let events = recorder.wait_for(2).await;
        assert!(events.contains(&"+store/4".to_string()));
        discovery.stop().await;
    }

    #[tokio::test]
    async fn test_backend_state_does_not_clear_table() {
        let registry = Arc::new(MemoryRegistry::new("/t"));
        let discovery = ClusterDiscovery::new(config(), registry.clone());
        discovery.start().await.unwrap();
        let recorder = Arc::new(Recorder::default());
        discovery.add_listener(recorder.clone());

        registry.set_state(BackendState::Suspended);
        let events = recorder.wait_for(2).await;
        assert_eq!(events.last().map(String::as_str), Some("state:suspended"));
        assert_eq!(discovery.nodes(RoleType::Coordinator).len(), 1);
        discovery.stop().await;
    }

    #[tokio::test]
    async fn test_stop_deregisters_and_clears() {
        let registry = Arc::new(MemoryRegistry::new("/t"));
        let discovery = ClusterDiscovery::new(config(), registry.clone());
        discovery.start().await.unwrap();
        assert_eq!(registry.snapshot(RoleType::Coordinator).len(), 1);

        discovery.stop().await;
        discovery.stop().await;
        assert!(registry.snapshot(RoleType::Coordinator).is_empty());
        assert!(discovery.membership().is_empty());
        assert!(discovery.start().await.is_err());
    }
}
