//! In-process coordination registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use super::{BackendState, DiscoveryBackend, DiscoveryError, NodeAddress, RoleNodes, RoleType};

/// Registry of ephemeral node registrations under a base path, one
/// sub-path per role (`{base}/{role}/{index}`).
///
/// Suitable for single-process deployments and for tests, which can flip
/// availability and the connection state to exercise failure paths.
pub struct MemoryRegistry {
    base_path: String,
    roles: RwLock<HashMap<RoleType, watch::Sender<RoleNodes>>>,
    state: watch::Sender<BackendState>,
    available: AtomicBool,
}

impl MemoryRegistry {
    /// Create an empty registry rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<String>) -> Self {
        let (state, _) = watch::channel(BackendState::Connected);
        Self {
            base_path: base_path.into().trim_end_matches('/').to_string(),
            roles: RwLock::new(HashMap::new()),
            state,
            available: AtomicBool::new(true),
        }
    }

    /// Registry path of one node.
    #[must_use]
    pub fn node_path(&self, role: RoleType, index: u32) -> String {
        format!("{}/{}/{}", self.base_path, role, index)
    }

    /// Current nodes of one role.
    #[must_use]
    pub fn snapshot(&self, role: RoleType) -> RoleNodes {
        self.roles
            .read()
            .get(&role)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }

    /// Make every subsequent request fail (`false`) or succeed (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Publish a connection state change to watchers.
    ///
    /// Registrations are kept; callers simulate session loss by
    /// deregistering nodes themselves.
    pub fn set_state(&self, state: BackendState) {
        self.state.send_replace(state);
    }

    fn check_available(&self) -> Result<(), DiscoveryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DiscoveryError::Backend(format!(
                "registry {} unavailable",
                self.base_path
            )))
        }
    }

    fn with_role<R>(&self, role: RoleType, f: impl FnOnce(&watch::Sender<RoleNodes>) -> R) -> R {
        if let Some(tx) = self.roles.read().get(&role) {
            return f(tx);
        }
        let mut roles = self.roles.write();
        let tx = roles
            .entry(role)
            .or_insert_with(|| watch::channel(RoleNodes::new()).0);
        f(tx)
    }
}

#[async_trait]
impl DiscoveryBackend for MemoryRegistry {
    async fn register(
        &self,
        role: RoleType,
        index: u32,
        address: &NodeAddress,
    ) -> Result<(), DiscoveryError> {
        self.check_available()?;
        self.with_role(role, |tx| {
            let mut result = Ok(());
            tx.send_if_modified(|nodes| match nodes.get(&index) {
                Some(existing) if existing == address => false,
                Some(existing) => {
                    result = Err(DiscoveryError::AlreadyRegistered {
                        role,
                        index,
                        address: existing.clone(),
                    });
                    false
                }
                None => {
                    nodes.insert(index, address.clone());
                    true
                }
            });
            result
        })?;
        debug!(path = %self.node_path(role, index), %address, "node registered");
        Ok(())
    }

    async fn deregister(&self, role: RoleType, index: u32) -> Result<(), DiscoveryError> {
        self.check_available()?;
        let removed = self.with_role(role, |tx| {
            tx.send_if_modified(|nodes| nodes.remove(&index).is_some())
        });
        if removed {
            debug!(path = %self.node_path(role, index), "node deregistered");
        }
        Ok(())
    }

    async fn watch(&self, role: RoleType) -> Result<watch::Receiver<RoleNodes>, DiscoveryError> {
        self.check_available()?;
        Ok(self.with_role(role, watch::Sender::subscribe))
    }

    fn state(&self) -> watch::Receiver<BackendState> {
        self.state.subscribe()
    }
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("base_path", &self.base_path)
            .field("roles", &self.roles.read().len())
            .field("state", &*self.state.borrow())
            .field("available", &self.available.load(Ordering::SeqCst))
            .finish()
    }
}
