use crate::membership::{service::MembershipService, types::NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub const DEFAULT_PARTITIONS: u32 = 256;

/// Maps keys to partitions and partitions to owning nodes.
///
/// Owners are derived from the sorted alive member list: the primary sits at
/// `partition % n`, the backup right after it. Every node computes the same
/// answer from the same membership view.
pub struct PartitionManager {
    num_partitions: u32,
    replication_factor: usize,
    membership: Arc<MembershipService>,
}

impl PartitionManager {
    pub fn new(membership: Arc<MembershipService>) -> Self {
        Self::with_partitions(membership, DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(membership: Arc<MembershipService>, num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
            replication_factor: 1,
            membership,
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn local_node_id(&self) -> &NodeId {
        self.membership.local_id()
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.num_partitions as u64) as u32
    }

    /// Primary first, then up to `replication_factor` distinct backups.
    pub fn get_owners(&self, partition: u32) -> Vec<NodeId> {
        let mut node_ids: Vec<NodeId> = self
            .membership
            .get_alive_members()
            .into_iter()
            .map(|node| node.id)
            .collect();
        if node_ids.is_empty() {
            return vec![];
        }
        node_ids.sort();

        let copies = (1 + self.replication_factor).min(node_ids.len());
        (0..copies)
            .map(|offset| node_ids[(partition as usize + offset) % node_ids.len()].clone())
            .collect()
    }

    /// True when this node is the primary, or when no owner is known at all.
    pub fn is_local_primary(&self, partition: u32) -> bool {
        match self.get_owners(partition).first() {
            Some(primary) => primary == self.membership.local_id(),
            None => true,
        }
    }

    pub fn my_primary_partitions(&self) -> Vec<u32> {
        (0..self.num_partitions)
            .filter(|&partition| {
                self.get_owners(partition)
                    .first()
                    .is_some_and(|owner| owner == self.membership.local_id())
            })
            .collect()
    }
}
