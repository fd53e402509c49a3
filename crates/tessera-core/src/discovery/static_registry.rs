//! Fixed membership from a seed list.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use super::{BackendState, DiscoveryBackend, DiscoveryError, NodeAddress, RoleNodes, RoleType};

/// One configured node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNode {
    /// Node role.
    pub role: RoleType,
    /// Node index within the role.
    pub index: u32,
    /// Node address.
    pub address: NodeAddress,
}

/// A [`DiscoveryBackend`] whose membership never changes.
///
/// Registration succeeds only for nodes that are part of the seed list at
/// the same address; deregistration is a no-op.
pub struct StaticRegistry {
    roles: HashMap<RoleType, watch::Sender<RoleNodes>>,
    state: watch::Sender<BackendState>,
}

impl StaticRegistry {
    /// Build the registry from a seed list. Later duplicates of the same
    /// `(role, index)` override earlier ones.
    #[must_use]
    pub fn new(nodes: impl IntoIterator<Item = StaticNode>) -> Self {
        let mut tables: HashMap<RoleType, RoleNodes> = HashMap::new();
        for node in nodes {
            tables
                .entry(node.role)
                .or_default()
                .insert(node.index, node.address);
        }
        let roles = RoleType::ALL
            .into_iter()
            .map(|role| {
                let nodes = tables.remove(&role).unwrap_or_default();
                (role, watch::channel(nodes).0)
            })
            .collect();
        let (state, _) = watch::channel(BackendState::Connected);
        Self { roles, state }
    }

    fn nodes(&self, role: RoleType) -> RoleNodes {
        self.roles
            .get(&role)
            .map(|tx| tx.borrow().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DiscoveryBackend for StaticRegistry {
    async fn register(
        &self,
        role: RoleType,
        index: u32,
        address: &NodeAddress,
    ) -> Result<(), DiscoveryError> {
        match self.nodes(role).get(&index) {
            Some(seeded) if seeded == address => {
                debug!(%role, index, %address, "static node confirmed");
                Ok(())
            }
            Some(seeded) => Err(DiscoveryError::AlreadyRegistered {
                role,
                index,
                address: seeded.clone(),
            }),
            None => Err(DiscoveryError::Backend(format!(
                "{role} node {index} is not in the static seed list"
            ))),
        }
    }

    async fn deregister(&self, _role: RoleType, _index: u32) -> Result<(), DiscoveryError> {
        Ok(())
    }

    async fn watch(&self, role: RoleType) -> Result<watch::Receiver<RoleNodes>, DiscoveryError> {
        self.roles
            .get(&role)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| DiscoveryError::Backend(format!("role {role} not watchable")))
    }

    fn state(&self) -> watch::Receiver<BackendState> {
        self.state.subscribe()
    }
}

impl std::fmt::Debug for StaticRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for role in RoleType::ALL {
            map.entry(&role, &self.nodes(role).len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeds() -> Vec<StaticNode> {
        vec![
            StaticNode {
                role: RoleType::Coordinator,
                index: 0,
                address: NodeAddress::new("coord", 55_500),
            },
            StaticNode {
                role: RoleType::Store,
                index: 0,
                address: NodeAddress::new("store-0", 7000),
            },
            StaticNode {
                role: RoleType::Store,
                index: 1,
                address: NodeAddress::new("store-1", 7000),
            },
        ]
    }

    #[tokio::test]
    async fn test_watch_returns_seeded_nodes() {
        let registry = StaticRegistry::new(seeds());
        let rx = registry.watch(RoleType::Store).await.unwrap();
        let nodes = rx.borrow().clone();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[&1], NodeAddress::new("store-1", 7000));
        assert!(registry.watch(RoleType::Frontend).await.unwrap().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_register_checks_seed_list() {
        let registry = StaticRegistry::new(seeds());
        registry
            .register(RoleType::Coordinator, 0, &NodeAddress::new("coord", 55_500))
            .await
            .unwrap();
        assert!(matches!(
            registry
                .register(RoleType::Coordinator, 0, &NodeAddress::new("elsewhere", 1))
                .await,
            Err(DiscoveryError::AlreadyRegistered { .. })
        ));
        assert!(matches!(
            registry
                .register(RoleType::Coordinator, 5, &NodeAddress::new("coord", 55_500))
                .await,
            Err(DiscoveryError::Backend(_))
        ));
    }

    #[test]
    fn test_seed_list_from_json() {
        let nodes: Vec<StaticNode> = serde_json::from_str(
            r#"[{ "role": "store", "index": 3, "address": { "host": "s3", "port": 9 } }]"#,
        )
        .unwrap();
        let registry = StaticRegistry::new(nodes);
        assert_eq!(registry.nodes(RoleType::Store).len(), 1);
    }
}
