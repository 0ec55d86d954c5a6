use super::types::{FunctorOutcome, FunctorResult};
use crate::command::types::{ResultId, SubmitterId};
use crate::storage::events::ListenerId;
use crate::storage::memory::DistributedMap;

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

type OutcomeSender = watch::Sender<Option<FunctorOutcome>>;
pub type OutcomeReceiver = watch::Receiver<Option<FunctorOutcome>>;

struct Inbox {
    results: Arc<DistributedMap<ResultId, FunctorResult>>,
    pending: DashMap<ResultId, OutcomeSender>,
    delivered: AtomicU64,
}

impl Inbox {
    fn accept(&self, result: &FunctorResult) {
        let Some(outcome) = result.outcome.clone() else {
            return;
        };

        match self.pending.remove(&result.result_id) {
            Some((_, sender)) => {
                // Receivers may already be gone; the outcome is still consumed.
                let _ = sender.send(Some(outcome));
                self.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Delivered result {}", result.result_id);
            }
            None => tracing::trace!("Ignoring duplicate notification for {}", result.result_id),
        }

        self.results.remove_local(&result.result_id);
    }
}

/// Per-submitter bridge from the shared result store to local futures.
///
/// Subscribes to store events tagged with this submitter's id. A complete
/// record resolves its future at most once and is then removed from the
/// store.
pub struct ResultDelivery {
    submitter_id: SubmitterId,
    inbox: Arc<Inbox>,
    listener: ListenerId,
    task: JoinHandle<()>,
}

impl ResultDelivery {
    /// Must be called from within a tokio runtime.
    pub fn start(submitter_id: SubmitterId, results: Arc<DistributedMap<ResultId, FunctorResult>>) -> Arc<Self> {
        let tag = submitter_id.clone();
        let (listener, mut events) = results.subscribe(move |event| event.value().submitter_id == tag);

        let inbox = Arc::new(Inbox {
            results,
            pending: DashMap::new(),
            delivered: AtomicU64::new(0),
        });

        let task = {
            let inbox = inbox.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if event.is_removal() || !event.value().complete {
                        continue;
                    }
                    inbox.accept(event.value());
                }
            })
        };

        tracing::debug!("Result delivery started for submitter {}", submitter_id);
        Arc::new(Self {
            submitter_id,
            inbox,
            listener,
            task,
        })
    }

    pub fn submitter_id(&self) -> &SubmitterId {
        &self.submitter_id
    }

    /// Registers interest in `result_id`. Call before the functor is submitted.
    pub fn register(&self, result_id: ResultId) -> OutcomeReceiver {
        let (sender, receiver) = watch::channel(None);
        self.inbox.pending.insert(result_id, sender);
        receiver
    }

    pub fn forget(&self, result_id: &ResultId) {
        self.inbox.pending.remove(result_id);
    }

    /// Futures registered but not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.inbox.pending.len()
    }

    pub fn delivered_count(&self) -> u64 {
        self.inbox.delivered.load(Ordering::Relaxed)
    }
}

impl Drop for ResultDelivery {
    fn drop(&mut self) {
        self.task.abort();
        self.inbox.results.unsubscribe(self.listener);
    }
}
