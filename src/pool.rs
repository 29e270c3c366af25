//! External pool-adapter contract.
//!
//! The topology manager discovers and diffs; the pool adapter owns the
//! actual per-node connection pools and serializes its own mutations. The
//! manager only ever produces the [`FreezeReason::Manager`] reason; other
//! reasons belong to collaborators and are opaque here.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::address::RedisUri;
use crate::error::Result;

/// Role of a node within the replication group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Sentinel,
    Master,
    Replica,
}

/// Why a replica is frozen (present but not served traffic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeReason {
    /// Frozen by the topology manager.
    Manager,
    /// Frozen by the reconnect machinery.
    Reconnect,
    /// Frozen by an operator or another subsystem.
    System,
}

/// Initial topology discovered at bootstrap, handed to the pool
/// initializer before the reconciliation scheduler starts.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    pub master: RedisUri,
    pub replicas: Vec<RedisUri>,
    /// Replicas reported down at bootstrap; collaborators skip their
    /// initial connection.
    pub disconnected_replicas: HashSet<RedisUri>,
    pub sentinels: Vec<RedisUri>,
}

impl TopologySnapshot {
    /// Every node with its role, sentinels first.
    pub fn nodes(&self) -> Vec<(NodeRole, RedisUri)> {
        let mut nodes: Vec<(NodeRole, RedisUri)> = self
            .sentinels
            .iter()
            .map(|uri| (NodeRole::Sentinel, uri.clone()))
            .collect();
        nodes.push((NodeRole::Master, self.master.clone()));
        nodes.extend(
            self.replicas
                .iter()
                .map(|uri| (NodeRole::Replica, uri.clone())),
        );
        nodes
    }
}

/// Contract the connection-pool layer implements for the manager.
///
/// All mutations are serialized by the implementation; the manager calls
/// them only while holding the shutdown gate.
#[async_trait]
pub trait PoolAdapter: Send + Sync {
    /// Initialize pools from the bootstrap snapshot.
    async fn init(&self, snapshot: &TopologySnapshot) -> Result<()>;

    /// Atomically redirect command routing to a new master. On failure the
    /// caller rolls back its master cell.
    async fn change_master(&self, new_master: RedisUri) -> Result<()>;

    async fn add_replica(&self, uri: RedisUri) -> Result<()>;

    fn has_replica(&self, uri: &RedisUri) -> bool;

    /// Freeze a replica. True iff the state actually changed.
    fn replica_down(&self, uri: &RedisUri, reason: FreezeReason) -> bool;

    /// Unfreeze a replica. True iff the state actually changed.
    fn replica_up(&self, uri: &RedisUri, reason: FreezeReason) -> bool;

    fn is_replica_unfrozen(&self, uri: &RedisUri) -> bool;

    /// Current replica endpoints, for the removal diff.
    fn replica_endpoints(&self) -> Vec<RedisUri>;

    /// Tear down all pools; called last during shutdown and on bootstrap
    /// failure.
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_nodes() {
        let master = RedisUri::parse("redis://10.0.0.1:6379").unwrap();
        let replica = RedisUri::parse("redis://10.0.0.3:6379").unwrap();
        let sentinel = RedisUri::parse("redis://10.0.0.9:26379").unwrap();
        let snapshot = TopologySnapshot {
            master: master.clone(),
            replicas: vec![replica.clone()],
            disconnected_replicas: HashSet::new(),
            sentinels: vec![sentinel.clone()],
        };

        let nodes = snapshot.nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0], (NodeRole::Sentinel, sentinel));
        assert_eq!(nodes[1], (NodeRole::Master, master));
        assert_eq!(nodes[2], (NodeRole::Replica, replica));
    }
}
