//! Worker Pool
//!
//! Runs this node's workers. Each worker owns one `TaskProcessorMediator`,
//! keeps its lease alive, and pulls execution turns from it. A monitor loop
//! hands the queue of any worker whose lease lapsed to a live worker.
//!
//! ## Responsibilities
//! - **Dispatch**: new turn tokens go to the worker chosen by hashing the context id.
//! - **Execution**: up to `worker_concurrency` turns per worker at once.
//! - **Leasing**: renewal every third of the lease period; a fenced worker is replaced.
//! - **Recovery**: expired mediators are drained into a live worker exactly once.

use super::mediator::{MediatorStore, TaskProcessorMediator};
use super::monitor::LeaseMonitor;
use super::types::*;
use crate::command::types::{ContextId, SubmissionKeyPair};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::membership::types::NodeId;

use dashmap::DashMap;
use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

pub type TurnFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

/// Executes one turn token. Supplied by the engine.
pub type TaskRunnerFn = Arc<dyn Fn(SubmissionKeyPair) -> TurnFuture + Send + Sync>;

struct WorkerHandle {
    slot: u32,
    mediator: Arc<TaskProcessorMediator>,
    notify: Arc<Notify>,
    loop_handle: JoinHandle<()>,
    renewal_handle: JoinHandle<()>,
}

impl WorkerHandle {
    fn abort(&self) {
        self.loop_handle.abort();
        self.renewal_handle.abort();
    }
}

/// Routing view of a live worker.
#[derive(Clone)]
struct WorkerRoute {
    worker_id: String,
    mediator: Arc<TaskProcessorMediator>,
    notify: Arc<Notify>,
}

pub struct TaskProcessorPool {
    node_id: NodeId,
    config: EngineConfig,
    store: Arc<MediatorStore>,
    monitor: Arc<LeaseMonitor>,
    runner: TaskRunnerFn,
    workers: DashMap<String, WorkerHandle>,
    next_slot: AtomicU32,
    reassignments: AtomicU64,
    /// Tokens dispatched while no worker was alive.
    backlog: Mutex<VecDeque<SubmissionKeyPair>>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl TaskProcessorPool {
    pub fn new(node_id: NodeId, config: EngineConfig, store: Arc<MediatorStore>, runner: TaskRunnerFn) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            config,
            store,
            monitor: Arc::new(LeaseMonitor::new()),
            runner,
            workers: DashMap::new(),
            next_slot: AtomicU32::new(0),
            reassignments: AtomicU64::new(0),
            backlog: Mutex::new(VecDeque::new()),
            monitor_handle: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Spawns the configured workers and the lease monitor loop.
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        tracing::info!("Starting {} workers on {}", self.config.workers, self.node_id);

        for _ in 0..self.config.workers {
            self.spawn_worker()?;
        }

        let pool = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pool.config.monitor_interval());
            loop {
                ticker.tick().await;
                if pool.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                pool.recover_expired(now_ms());
            }
        });

        if let Some(previous) = self
            .monitor_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle)
        {
            previous.abort();
        }
        Ok(())
    }

    pub fn spawn_worker(self: &Arc<Self>) -> Result<String, EngineError> {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        let worker_id = format!("{}-w{}", self.node_id, slot);
        let key = TaskProcessorMediatorKey::new(self.config.queue_name.clone(), slot, worker_id.clone());

        let mediator = Arc::new(TaskProcessorMediator::new(
            key,
            worker_id.clone(),
            self.store.clone(),
            self.monitor.clone(),
        ));
        mediator.register();
        mediator.get_task_processor_lease(self.config.lease_duration_ms)?;

        let notify = Arc::new(Notify::new());
        let loop_handle = tokio::spawn(self.clone().worker_loop(
            worker_id.clone(),
            mediator.clone(),
            notify.clone(),
        ));
        let renewal_handle = self.spawn_lease_renewal(mediator.clone());

        self.workers.insert(
            worker_id.clone(),
            WorkerHandle {
                slot,
                mediator,
                notify,
                loop_handle,
                renewal_handle,
            },
        );
        tracing::info!("Worker {} started", worker_id);

        self.flush_backlog();
        Ok(worker_id)
    }

    /// Kills a worker the way a crash would: no cleanup, no replacement. Its
    /// queue is recovered once its lease expires.
    pub fn stop_worker(&self, worker_id: &str) -> bool {
        match self.workers.remove(worker_id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::warn!("Worker {} stopped", worker_id);
                true
            }
            None => false,
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: String, mediator: Arc<TaskProcessorMediator>, notify: Arc<Notify>) {
        let permits = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut turns = JoinSet::new();
        let poll_interval = self.config.poll_interval();

        loop {
            while let Some(joined) = turns.try_join_next() {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    tracing::error!("Worker {} turn panicked: {}", worker_id, e);
                }
            }

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };

            match mediator.dequeue_task() {
                Ok(Some(pair)) => {
                    tracing::trace!("Worker {} picked up {}", worker_id, pair.key);
                    let pool = self.clone();
                    let mediator = mediator.clone();
                    let notify = notify.clone();

                    turns.spawn(async move {
                        let _permit = permit;
                        let started = Instant::now();
                        let outcome = (pool.runner)(pair.clone()).await;

                        // No suspension point from here on: the follow-up is queued
                        // before the finished turn leaves the in-progress set.
                        if let Some(next) = outcome.follow_up {
                            if mediator.enqueue_task(next.clone()) {
                                notify.notify_one();
                            } else {
                                pool.dispatch(next);
                            }
                        }
                        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                        mediator.task_done(&pair.key, elapsed_ms, outcome.succeeded);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = notify.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Worker {} lost its queue: {}", worker_id, e);
                    break;
                }
            }
        }

        self.retire(&worker_id);
    }

    fn spawn_lease_renewal(&self, mediator: Arc<TaskProcessorMediator>) -> JoinHandle<()> {
        let interval = self.config.lease_renewal_interval();
        let duration_ms = self.config.lease_duration_ms;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match mediator.get_task_processor_lease(duration_ms) {
                    Ok(lease) => tracing::trace!("Renewed {} until {}", mediator.key(), lease.expires_at),
                    Err(e) => {
                        tracing::warn!("Stopped renewing {}: {}", mediator.key(), e);
                        break;
                    }
                }
            }
        })
    }

    /// Removes a worker whose queue is gone and starts a replacement.
    fn retire(self: &Arc<Self>, worker_id: &str) {
        let Some((_, handle)) = self.workers.remove(worker_id) else {
            return;
        };
        handle.renewal_handle.abort();

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        match self.spawn_worker() {
            Ok(replacement) => tracing::info!("Worker {} replaced by {}", worker_id, replacement),
            Err(e) => tracing::error!("Failed to replace worker {}: {}", worker_id, e),
        }
    }

    // --- dispatch ---

    /// Queues a turn token on the worker responsible for its context.
    pub fn dispatch(self: &Arc<Self>, pair: SubmissionKeyPair) {
        loop {
            let Some(route) = self.route(pair.context_id()) else {
                self.park(pair);
                return;
            };

            if route.mediator.enqueue_task(pair.clone()) {
                route.notify.notify_one();
                tracing::trace!("Dispatched {} to {}", pair.key, route.worker_id);
                return;
            }

            // The mediator was adopted away while its worker was still listed.
            if let Some((_, handle)) = self.workers.remove(&route.worker_id) {
                handle.abort();
                if !self.shutting_down.load(Ordering::SeqCst)
                    && let Err(e) = self.spawn_worker()
                {
                    tracing::error!("Failed to replace worker {}: {}", route.worker_id, e);
                }
            }
        }
    }

    fn live_routes(&self) -> Vec<(u32, WorkerRoute)> {
        let mut routes: Vec<(u32, WorkerRoute)> = self
            .workers
            .iter()
            .map(|entry| {
                let handle = entry.value();
                (
                    handle.slot,
                    WorkerRoute {
                        worker_id: entry.key().clone(),
                        mediator: handle.mediator.clone(),
                        notify: handle.notify.clone(),
                    },
                )
            })
            .collect();
        routes.sort_by_key(|(slot, _)| *slot);
        routes
    }

    fn route(&self, context_id: &ContextId) -> Option<WorkerRoute> {
        let routes = self.live_routes();
        if routes.is_empty() {
            return None;
        }

        let mut hasher = DefaultHasher::new();
        context_id.hash(&mut hasher);
        let index = (hasher.finish() % routes.len() as u64) as usize;
        routes.into_iter().nth(index).map(|(_, route)| route)
    }

    fn park(self: &Arc<Self>, pair: SubmissionKeyPair) {
        tracing::debug!("No live worker; parking {}", pair.key);
        self.backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(pair);

        // A worker may have started between routing and parking.
        if !self.workers.is_empty() {
            self.flush_backlog();
        }
    }

    fn flush_backlog(self: &Arc<Self>) {
        let parked: Vec<SubmissionKeyPair> = self
            .backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();

        for pair in parked {
            self.dispatch(pair);
        }
    }

    // --- recovery ---

    /// Adopts every mediator whose lease expired before `now`. Returns the
    /// number of mediators adopted.
    pub fn recover_expired(self: &Arc<Self>, now: u64) -> usize {
        let mut adopted = 0;

        for (key, lease) in self.monitor.expired(now) {
            let Some(adopter) = self.pick_adopter(&lease.holder) else {
                tracing::debug!("No live worker can adopt {} yet", key);
                self.monitor.track(key, lease);
                continue;
            };

            match self.adopt(&key, &adopter) {
                Ok(count) => {
                    adopted += 1;
                    self.reassignments.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(
                        "Reassigned {} task(s) from {} (held by {}) to {}",
                        count,
                        key,
                        lease.holder,
                        adopter.worker_id
                    );
                }
                Err(e) => tracing::warn!("Could not adopt {}: {}", key, e),
            }
        }

        adopted
    }

    fn pick_adopter(&self, previous_holder: &str) -> Option<WorkerRoute> {
        self.live_routes()
            .into_iter()
            .map(|(_, route)| route)
            .filter(|route| route.worker_id != previous_holder)
            .min_by_key(|route| route.mediator.size() + route.mediator.number_of_tasks_in_progress())
    }

    fn adopt(self: &Arc<Self>, orphan_key: &TaskProcessorMediatorKey, adopter: &WorkerRoute) -> Result<usize, EngineError> {
        let orphan = TaskProcessorMediator::new(
            orphan_key.clone(),
            adopter.worker_id.clone(),
            self.store.clone(),
            self.monitor.clone(),
        );

        orphan.get_task_processor_lease(self.config.lease_duration_ms)?;
        let mut tasks = orphan.drain_queue_to_be_executed()?;
        if let Some(mut leftover) = orphan.decommission() {
            tasks.extend(leftover.drain());
        }

        let count = tasks.len();
        for pair in tasks {
            if !adopter.mediator.enqueue_task(pair.clone()) {
                self.dispatch(pair);
            }
        }
        adopter.notify.notify_one();
        Ok(count)
    }

    // --- introspection ---

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn monitor(&self) -> &Arc<LeaseMonitor> {
        &self.monitor
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.live_routes()
            .into_iter()
            .map(|(_, route)| route.worker_id)
            .collect()
    }

    pub fn mediator(&self, worker_id: &str) -> Option<Arc<TaskProcessorMediator>> {
        self.workers.get(worker_id).map(|handle| handle.mediator.clone())
    }

    pub fn tasks_in_progress(&self, worker_id: &str) -> usize {
        self.mediator(worker_id)
            .map(|mediator| mediator.number_of_tasks_in_progress())
            .unwrap_or_default()
    }

    /// Mediators adopted after their lease expired.
    pub fn reassignments(&self) -> u64 {
        self.reassignments.load(Ordering::SeqCst)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if let Some(handle) = self
            .monitor_handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }

        let ids: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            if let Some((_, handle)) = self.workers.remove(&id) {
                handle.abort();
            }
        }
        tracing::info!("Worker pool on {} shut down", self.node_id);
    }
}
