use super::types::FunctorResult;
use crate::cluster::protocol::{DeliverResultRequest, DeliverResultResponse, ENDPOINT_DELIVER_RESULT};
use crate::cluster::transport::HttpTransport;
use crate::command::types::ResultId;
use crate::membership::{
    service::MembershipService,
    types::{NodeId, NodeState},
};
use crate::storage::memory::DistributedMap;

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Writes completed functor results into the result store of the node their
/// submitter runs on.
///
/// A result that cannot reach its submitter's node is parked and retried on
/// every tick of the loop started by [`ResultPublisher::start`], until it is
/// delivered or the submitter's node is declared dead.
pub struct ResultPublisher {
    membership: Arc<MembershipService>,
    results: Arc<DistributedMap<ResultId, FunctorResult>>,
    transport: HttpTransport,
    undelivered: DashMap<ResultId, (NodeId, FunctorResult)>,
    retry_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResultPublisher {
    pub fn new(
        membership: Arc<MembershipService>,
        results: Arc<DistributedMap<ResultId, FunctorResult>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            membership,
            results,
            transport: HttpTransport::new(),
            undelivered: DashMap::new(),
            retry_handle: Mutex::new(None),
        })
    }

    pub fn start(self: &Arc<Self>, interval: Duration) {
        let publisher = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                publisher.retry_undelivered().await;
            }
        });

        if let Some(previous) = self
            .retry_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self
            .retry_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    pub fn results(&self) -> &Arc<DistributedMap<ResultId, FunctorResult>> {
        &self.results
    }

    /// Stores `result` unless a completed record with the same id is already
    /// present. Returns whether it was stored.
    pub fn store(&self, result: FunctorResult) -> bool {
        let result_id = result.result_id.clone();
        self.results.invoke(&result_id, move |slot| {
            if slot.as_ref().is_some_and(|existing| existing.complete) {
                return false;
            }
            *slot = Some(result);
            true
        })
    }

    pub async fn publish(&self, origin: &NodeId, result: FunctorResult) -> Result<()> {
        if origin == self.membership.local_id() {
            let result_id = result.result_id.clone();
            if !self.store(result) {
                tracing::debug!("Dropped duplicate completion for {}", result_id);
            }
            return Ok(());
        }

        let node = self
            .membership
            .get_member(origin)
            .ok_or_else(|| anyhow!("Submitter node {} is not a known member", origin))?;

        let result_id = result.result_id.clone();
        let response: DeliverResultResponse = self
            .transport
            .post_json(node.http_addr, ENDPOINT_DELIVER_RESULT, &DeliverResultRequest { result })
            .await?;

        if !response.accepted {
            tracing::debug!("{} already held a completion for {}", origin, result_id);
        }
        Ok(())
    }

    /// Publishes `result`, parking it for a later retry when its submitter's
    /// node cannot be reached.
    pub async fn publish_or_park(&self, origin: &NodeId, result: FunctorResult) {
        let result_id = result.result_id.clone();
        if let Err(e) = self.publish(origin, result.clone()).await {
            tracing::warn!(
                "Failed to publish result {} to {}, will retry: {}",
                result_id,
                origin,
                e
            );
            self.undelivered.insert(result_id, (origin.clone(), result));
        }
    }

    /// Retries every parked result once. Returns how many were delivered.
    pub async fn retry_undelivered(&self) -> usize {
        let parked: Vec<(ResultId, NodeId, FunctorResult)> = self
            .undelivered
            .iter()
            .map(|entry| {
                let (origin, result) = entry.value();
                (entry.key().clone(), origin.clone(), result.clone())
            })
            .collect();

        let mut delivered = 0;
        for (result_id, origin, result) in parked {
            let dead = self
                .membership
                .get_member(&origin)
                .is_some_and(|node| node.state == NodeState::Dead);
            if dead {
                tracing::warn!("Dropping result {}: submitter node {} is dead", result_id, origin);
                self.undelivered.remove(&result_id);
                continue;
            }

            match self.publish(&origin, result).await {
                Ok(()) => {
                    tracing::info!("Delivered parked result {} to {}", result_id, origin);
                    self.undelivered.remove(&result_id);
                    delivered += 1;
                }
                Err(e) => tracing::debug!("Result {} still undeliverable: {}", result_id, e),
            }
        }
        delivered
    }

    pub fn undelivered_count(&self) -> usize {
        self.undelivered.len()
    }
}
