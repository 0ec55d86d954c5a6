use super::monitor::LeaseMonitor;
use super::types::*;
use crate::command::types::{SubmissionKey, SubmissionKeyPair};
use crate::error::EngineError;
use crate::storage::memory::DistributedMap;

use std::sync::Arc;

pub type MediatorStore = DistributedMap<TaskProcessorMediatorKey, MediatorState>;

/// One worker's private task queue, as seen by `holder`.
///
/// Every operation is a single `invoke` on the mediator's stored state, so a
/// drain can never interleave with an enqueue or dequeue. Queue consumers
/// (`dequeue_task`, `drain_queue_to_be_executed`) must hold a valid lease once
/// one has been taken. Producers may always enqueue while the mediator exists.
pub struct TaskProcessorMediator {
    key: TaskProcessorMediatorKey,
    holder: String,
    store: Arc<MediatorStore>,
    monitor: Arc<LeaseMonitor>,
}

impl TaskProcessorMediator {
    pub fn new(
        key: TaskProcessorMediatorKey,
        holder: impl Into<String>,
        store: Arc<MediatorStore>,
        monitor: Arc<LeaseMonitor>,
    ) -> Self {
        Self {
            key,
            holder: holder.into(),
            store,
            monitor,
        }
    }

    pub fn key(&self) -> &TaskProcessorMediatorKey {
        &self.key
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Creates the stored state. Returns false if it already existed.
    pub fn register(&self) -> bool {
        self.store.invoke(&self.key, |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(MediatorState::default());
            true
        })
    }

    /// Appends a task. Returns false when the mediator has been decommissioned.
    pub fn enqueue_task(&self, pair: SubmissionKeyPair) -> bool {
        self.store.invoke(&self.key, |slot| match slot.as_mut() {
            Some(state) => {
                state.enqueue(pair);
                true
            }
            None => false,
        })
    }

    pub fn dequeue_task(&self) -> Result<Option<SubmissionKeyPair>, EngineError> {
        let now = now_ms();
        self.store.invoke(&self.key, |slot| {
            let Some(state) = slot.as_mut() else {
                return Err(self.expired_error());
            };
            self.authorize(state, now)?;
            Ok(state.dequeue())
        })
    }

    /// Removes and returns every in-progress and queued task in one step.
    pub fn drain_queue_to_be_executed(&self) -> Result<Vec<SubmissionKeyPair>, EngineError> {
        let now = now_ms();
        self.store.invoke(&self.key, |slot| {
            let Some(state) = slot.as_mut() else {
                return Ok(Vec::new());
            };
            self.authorize(state, now)?;
            Ok(state.drain())
        })
    }

    /// Returns false if `key` was not in progress here (already adopted elsewhere).
    pub fn task_done(&self, key: &SubmissionKey, duration_ms: u64, succeeded: bool) -> bool {
        self.store.invoke(&self.key, |slot| {
            slot.as_mut()
                .is_some_and(|state| state.complete(key, duration_ms, succeeded))
        })
    }

    /// Tasks queued and not yet dequeued.
    pub fn size(&self) -> usize {
        self.store
            .inspect_local(&self.key, |state| state.queue.len())
            .unwrap_or_default()
    }

    pub fn number_of_tasks_in_progress(&self) -> usize {
        self.store
            .inspect_local(&self.key, |state| state.in_progress.len())
            .unwrap_or_default()
    }

    pub fn get_tasks_in_progress(&self) -> Vec<SubmissionKeyPair> {
        self.store
            .inspect_local(&self.key, |state| state.in_progress.clone())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> TaskStats {
        self.store
            .inspect_local(&self.key, |state| state.stats.clone())
            .unwrap_or_default()
    }

    /// Obtains or renews the lease and hands it to the lease monitor.
    pub fn get_task_processor_lease(&self, duration_ms: u64) -> Result<Lease, EngineError> {
        let now = now_ms();
        let grant = self.store.invoke(&self.key, |slot| {
            slot.as_mut()
                .map(|state| state.acquire_lease(&self.holder, duration_ms, now))
        });

        let lease = match grant {
            Some(LeaseGrant::Granted(lease)) | Some(LeaseGrant::Renewed(lease)) => lease,
            Some(LeaseGrant::TakenOver { lease, previous }) => {
                tracing::info!("{} took over {} from {}", self.holder, self.key, previous);
                lease
            }
            Some(LeaseGrant::Held { holder, expires_at }) => {
                return Err(EngineError::LeaseHeld {
                    mediator: self.key.to_string(),
                    holder,
                    expires_at,
                });
            }
            Some(LeaseGrant::Expired) | None => return Err(self.expired_error()),
        };

        self.monitor.track(self.key.clone(), lease.clone());
        Ok(lease)
    }

    /// Removes the mediator, returning whatever state it still held.
    pub fn decommission(&self) -> Option<MediatorState> {
        self.monitor.untrack(&self.key);
        let state = self.store.remove_local(&self.key);
        if state.is_some() {
            tracing::debug!("Decommissioned mediator {}", self.key);
        }
        state
    }

    fn authorize(&self, state: &MediatorState, now: u64) -> Result<(), EngineError> {
        match state.authorize(&self.holder, now) {
            LeaseCheck::Open | LeaseCheck::Valid => Ok(()),
            LeaseCheck::Expired => Err(self.expired_error()),
            LeaseCheck::Held { holder, expires_at } => Err(EngineError::LeaseHeld {
                mediator: self.key.to_string(),
                holder,
                expires_at,
            }),
        }
    }

    fn expired_error(&self) -> EngineError {
        EngineError::LeaseExpired {
            mediator: self.key.to_string(),
            holder: self.holder.clone(),
        }
    }
}
