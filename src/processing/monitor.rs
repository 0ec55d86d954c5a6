use super::types::{Lease, TaskProcessorMediatorKey};
use dashmap::DashMap;

/// Tracks the current lease of every mediator on this node.
///
/// `expired` hands each lapsed lease out once and forgets it; a renewal
/// before that moment simply replaces the tracked expiry.
#[derive(Default)]
pub struct LeaseMonitor {
    leases: DashMap<TaskProcessorMediatorKey, Lease>,
}

impl LeaseMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, key: TaskProcessorMediatorKey, lease: Lease) {
        self.leases.insert(key, lease);
    }

    pub fn untrack(&self, key: &TaskProcessorMediatorKey) -> bool {
        self.leases.remove(key).is_some()
    }

    pub fn expired(&self, now: u64) -> Vec<(TaskProcessorMediatorKey, Lease)> {
        let candidates: Vec<TaskProcessorMediatorKey> = self
            .leases
            .iter()
            .filter(|entry| entry.value().is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        // A renewal may land between the scan and the removal.
        candidates
            .into_iter()
            .filter_map(|key| self.leases.remove_if(&key, |_, lease| lease.is_expired_at(now)))
            .collect()
    }

    pub fn expiry_of(&self, key: &TaskProcessorMediatorKey) -> Option<u64> {
        self.leases.get(key).map(|lease| lease.expires_at)
    }

    pub fn tracked_count(&self) -> usize {
        self.leases.len()
    }
}
