use super::events::{EventListeners, ListenerId, MapEvent};
use super::partitioner::PartitionManager;
use super::protocol::*;
use crate::cluster::transport::HttpTransport;
use crate::membership::{service::MembershipService, types::NodeId};

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Partitioned in-memory map.
///
/// Entries live in per-partition maps on the node that owns them. `invoke`
/// runs an operation against one key under the partition's write lock, which
/// makes it the building block for every read-modify-write the engine does.
/// Operations passed to `invoke` must not call back into the same map.
pub struct DistributedMap<K, V> {
    local_data: Arc<DashMap<u32, DashMap<K, V>>>,
    listeners: EventListeners<K, V>,
    membership: Arc<MembershipService>,
    partitioner: Arc<PartitionManager>,
    transport: HttpTransport,
    base_path: String,
}

impl<K, V> DistributedMap<K, V>
where
    K: ToString + FromStr + Clone + Hash + Eq + Send + Sync + 'static,
    <K as FromStr>::Err: std::fmt::Display,
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(membership: Arc<MembershipService>, partitioner: Arc<PartitionManager>) -> Self {
        Self::new_with_base(membership, partitioner, "")
    }

    /// `base_path` prefixes this map's internal endpoints so several maps can
    /// share one HTTP router.
    pub fn new_with_base(
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        base_path: &str,
    ) -> Self {
        let cleaned = base_path.trim_end_matches('/');
        let base_path = if cleaned.is_empty() {
            String::new()
        } else if cleaned.starts_with('/') {
            cleaned.to_string()
        } else {
            format!("/{}", cleaned)
        };

        Self {
            local_data: Arc::new(DashMap::new()),
            listeners: EventListeners::new(),
            membership,
            partitioner,
            transport: HttpTransport::new(),
            base_path,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_id().clone()
    }

    pub fn partition_of(&self, key: &K) -> u32 {
        self.partitioner.get_partition(&key.to_string())
    }

    pub fn is_local_primary(&self, key: &K) -> bool {
        self.partitioner.is_local_primary(self.partition_of(key))
    }

    pub fn primary_owner(&self, key: &K) -> Option<NodeId> {
        self.partitioner.get_owners(self.partition_of(key)).into_iter().next()
    }

    // --- events ---

    pub fn subscribe<F>(&self, filter: F) -> (ListenerId, mpsc::UnboundedReceiver<MapEvent<K, V>>)
    where
        F: Fn(&MapEvent<K, V>) -> bool + Send + Sync + 'static,
    {
        self.listeners.subscribe(filter)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // --- local operations ---

    pub fn store_local(&self, key: K, value: V) {
        self.invoke(&key, move |slot| *slot = Some(value));
    }

    pub fn remove_local(&self, key: &K) -> Option<V> {
        self.invoke(key, |slot| slot.take())
    }

    /// Runs `op` atomically against the current value of `key`.
    ///
    /// `op` sees `None` for an absent key; leaving `Some` stores the value,
    /// leaving `None` deletes it. One event is published per call that changes
    /// presence or writes a value.
    pub fn invoke<R>(&self, key: &K, op: impl FnOnce(&mut Option<V>) -> R) -> R {
        let partition = self.partition_of(key);
        let partition_map = self
            .local_data
            .entry(partition)
            .or_insert_with(DashMap::new);

        let mut slot = partition_map.remove(key).map(|(_, value)| value);
        let before = if self.listeners.is_empty() {
            None
        } else {
            slot.clone()
        };
        let existed = slot.is_some();

        let result = op(&mut slot);

        let event = match slot {
            Some(value) => {
                let event = (!self.listeners.is_empty()).then(|| {
                    if existed {
                        MapEvent::Updated {
                            key: key.clone(),
                            value: value.clone(),
                        }
                    } else {
                        MapEvent::Inserted {
                            key: key.clone(),
                            value: value.clone(),
                        }
                    }
                });
                partition_map.insert(key.clone(), value);
                event
            }
            None => before.map(|value| MapEvent::Removed {
                key: key.clone(),
                value,
            }),
        };

        if let Some(event) = event {
            self.listeners.publish(event);
        }
        drop(partition_map);

        result
    }

    pub fn get_local(&self, key: &K) -> Option<V> {
        self.inspect_local(key, V::clone)
    }

    /// Reads a local value in place without cloning it.
    pub fn inspect_local<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        let partition = self.partition_of(key);
        let partition_map = self.local_data.get(&partition)?;
        let value = partition_map.get(key)?;
        Some(f(value.value()))
    }

    pub fn contains_local(&self, key: &K) -> bool {
        self.inspect_local(key, |_| ()).is_some()
    }

    pub fn local_entry_count(&self) -> usize {
        self.local_data.iter().map(|entry| entry.value().len()).sum()
    }

    // --- routed operations ---

    pub async fn get(&self, key: &K) -> Option<V> {
        if let Some(value) = self.get_local(key) {
            return Some(value);
        }

        let owners = self.partitioner.get_owners(self.partition_of(key));
        let local = self.membership.local_id();

        for owner in owners.iter().filter(|owner| *owner != local) {
            match self.fetch_remote(owner, key).await {
                Ok(Some(value)) => {
                    tracing::debug!("GET: fetched from owner {}", owner);
                    return Some(value);
                }
                Ok(None) => tracing::debug!("GET: key not found on {}", owner),
                Err(e) => tracing::warn!("GET: failed to fetch from {}: {}", owner, e),
            }
        }

        None
    }

    pub async fn fetch_remote(&self, owner_id: &NodeId, key: &K) -> Result<Option<V>> {
        let node = self
            .membership
            .get_member(owner_id)
            .ok_or_else(|| anyhow!("Owner node not found: {}", owner_id))?;

        // Keys are opaque: `/`, `?` and `#` must stay inside one path segment.
        let mut url = reqwest::Url::parse(&HttpTransport::url(
            node.http_addr,
            &self.endpoint(ENDPOINT_GET_INTERNAL),
        ))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Internal GET endpoint is not a hierarchical URL"))?
            .push(&key.to_string());
        let response = self.transport.get(url.into()).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!("GET request failed {}", response.status()));
        }

        let body: GetResponse = response.json().await?;
        match body.value_json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_path, path)
    }
}
