//! # Cluster Discovery
//!
//! Role-based membership of the cluster, with delta notifications.
//!
//! Every node registers `(role, index, address)` with a coordination
//! backend. [`ClusterDiscovery`] watches the roles it cares about, keeps a
//! copy-on-write membership table, and tells its listeners which nodes
//! joined or left.
//!
//! ## Backends
//!
//! - `MemoryRegistry`: in-process registry with ephemeral registrations
//! - `StaticRegistry`: fixed membership from a seed list

mod cluster;
pub use cluster::ClusterDiscovery;

mod registry;
pub use registry::MemoryRegistry;

mod static_registry;
pub use static_registry::{StaticNode, StaticRegistry};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleType {
    /// Query front end.
    Frontend,
    /// Data ingestion node.
    Ingestor,
    /// Coordinator (sequencer and schema owner).
    Coordinator,
    /// Storage replica.
    Store,
}

impl RoleType {
    /// Every role, in a stable order.
    pub const ALL: [Self; 4] = [Self::Frontend, Self::Ingestor, Self::Coordinator, Self::Store];

    /// Lowercase role name, as used in registry paths.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::Ingestor => "ingestor",
            Self::Coordinator => "coordinator",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleType {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DiscoveryError::Backend(format!("unknown role: {s}")))
    }
}

/// Network address of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl NodeAddress {
    /// Create an address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| DiscoveryError::Backend(format!("address without port: {s}")))?;
        if host.is_empty() {
            return Err(DiscoveryError::Backend(format!("address without host: {s}")));
        }
        let port = port
            .parse()
            .map_err(|_| DiscoveryError::Backend(format!("invalid port in address: {s}")))?;
        Ok(Self::new(host, port))
    }
}

/// Nodes of one role, keyed by node index.
pub type RoleNodes = BTreeMap<u32, NodeAddress>;

/// Full membership: role to its nodes.
pub type MembershipTable = HashMap<RoleType, RoleNodes>;

/// Connection state of the coordination backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Session established.
    Connected,
    /// Connection interrupted; the session may still be alive.
    Suspended,
    /// Connection re-established after a suspension.
    Reconnected,
    /// Session expired; registrations are gone.
    Lost,
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Suspended => write!(f, "suspended"),
            Self::Reconnected => write!(f, "reconnected"),
            Self::Lost => write!(f, "lost"),
        }
    }
}

/// Errors from discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Discovery could not start. Fatal for the node.
    #[error("discovery startup failed: {0}")]
    Startup(#[source] Box<DiscoveryError>),

    /// The coordination backend failed or rejected a request.
    #[error("discovery backend error: {0}")]
    Backend(String),

    /// Another node already holds this role index.
    #[error("{role} node {index} already registered at {address}")]
    AlreadyRegistered {
        /// Role of the conflicting registration.
        role: RoleType,
        /// Node index of the conflicting registration.
        index: u32,
        /// Address of the existing registration.
        address: NodeAddress,
    },
}

/// Receives membership deltas from [`ClusterDiscovery`].
///
/// Each listener is driven by its own task, so calls to one listener are
/// ordered and never concurrent. A panic inside a callback is caught and
/// logged.
pub trait NodeDiscoveryListener: Send + Sync + 'static {
    /// Nodes of `role` appeared (or changed address).
    fn nodes_joined(&self, role: RoleType, nodes: &RoleNodes);

    /// Nodes of `role` disappeared (or changed address).
    fn nodes_left(&self, role: RoleType, nodes: &RoleNodes);

    /// The backend connection state changed.
    fn state_changed(&self, _state: BackendState) {}
}

/// Coordination service holding ephemeral node registrations.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync + 'static {
    /// Register a node. The registration lives until deregistered or the
    /// backend session is lost.
    async fn register(
        &self,
        role: RoleType,
        index: u32,
        address: &NodeAddress,
    ) -> Result<(), DiscoveryError>;

    /// Remove a node registration. Removing an absent node is not an error.
    async fn deregister(&self, role: RoleType, index: u32) -> Result<(), DiscoveryError>;

    /// Watch the nodes of one role. The receiver holds the current
    /// membership and is updated on every change.
    async fn watch(&self, role: RoleType) -> Result<watch::Receiver<RoleNodes>, DiscoveryError>;

    /// Watch the connection state.
    fn state(&self) -> watch::Receiver<BackendState>;
}

/// Compute `(added, removed)` between two views of one role.
///
/// An index whose address changed appears in both: it left at the old
/// address and joined at the new one.
#[must_use]
pub fn diff(old: &RoleNodes, new: &RoleNodes) -> (RoleNodes, RoleNodes) {
    let added = new
        .iter()
        .filter(|(index, address)| old.get(index) != Some(address))
        .map(|(index, address)| (*index, address.clone()))
        .collect();
    let removed = old
        .iter()
        .filter(|(index, address)| new.get(index) != Some(address))
        .map(|(index, address)| (*index, address.clone()))
        .collect();
    (added, removed)
}
