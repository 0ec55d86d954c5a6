use super::submitter::{CommandSubmitter, FunctorSubmitter};
use crate::cluster::protocol::*;
use crate::cluster::transport::HttpTransport;
use crate::command::registry::CommandRegistry;
use crate::command::types::{
    CommandEnvelope, ContextId, EnvelopeKind, ResultId, SubmissionKey, SubmissionState,
};
use crate::config::EngineConfig;
use crate::context::executor::ContextExecutor;
use crate::context::types::{ContextRecord, ContextValue, ManagementStrategy, QueuedCommand};
use crate::error::EngineError;
use crate::functor::publisher::ResultPublisher;
use crate::functor::types::FunctorResult;
use crate::membership::service::MembershipService;
use crate::membership::types::{Node, NodeId};
use crate::processing::mediator::MediatorStore;
use crate::processing::pool::{TaskProcessorPool, TaskRunnerFn, TurnFuture};
use crate::storage::memory::DistributedMap;
use crate::storage::partitioner::PartitionManager;

use std::sync::Arc;

pub const CONTEXTS_BASE_PATH: &str = "/contexts";
pub const RESULTS_BASE_PATH: &str = "/results";
pub const MEDIATORS_BASE_PATH: &str = "/mediators";

/// The engine handle of one node.
///
/// Built once at startup and shared by `Arc`; submitters borrow it. Owns the
/// context store, the functor result store, the mediator store and the worker
/// pool that drains context queues.
pub struct CommandEngine<C> {
    config: EngineConfig,
    membership: Arc<MembershipService>,
    transport: HttpTransport,
    registry: Arc<CommandRegistry<C>>,
    contexts: Arc<DistributedMap<ContextId, ContextRecord<C>>>,
    results: Arc<DistributedMap<ResultId, FunctorResult>>,
    mediators: Arc<MediatorStore>,
    publisher: Arc<ResultPublisher>,
    processors: Arc<TaskProcessorPool>,
}

impl<C: ContextValue> CommandEngine<C> {
    pub fn new(
        config: EngineConfig,
        membership: Arc<MembershipService>,
        partitioner: Arc<PartitionManager>,
        registry: Arc<CommandRegistry<C>>,
    ) -> Arc<Self> {
        let contexts = Arc::new(DistributedMap::new_with_base(
            membership.clone(),
            partitioner.clone(),
            CONTEXTS_BASE_PATH,
        ));
        let results = Arc::new(DistributedMap::new_with_base(
            membership.clone(),
            partitioner.clone(),
            RESULTS_BASE_PATH,
        ));
        let mediators = Arc::new(DistributedMap::new_with_base(
            membership.clone(),
            partitioner,
            MEDIATORS_BASE_PATH,
        ));

        let publisher = ResultPublisher::new(membership.clone(), results.clone());
        let executor = ContextExecutor::new(contexts.clone(), registry.clone(), publisher.clone());
        let runner: TaskRunnerFn = Arc::new(move |pair| -> TurnFuture { Box::pin(executor.clone().run_turn(pair)) });

        let processors = TaskProcessorPool::new(
            membership.local_id().clone(),
            config.clone(),
            mediators.clone(),
            runner,
        );

        Arc::new(Self {
            config,
            membership,
            transport: HttpTransport::new(),
            registry,
            contexts,
            results,
            mediators,
            publisher,
            processors,
        })
    }

    /// Starts the worker pool. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<(), EngineError> {
        self.processors.start()?;
        self.publisher.start(self.config.monitor_interval());
        tracing::info!(
            "Command engine started on {} ({} handlers registered)",
            self.local_id(),
            self.registry.handler_count()
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.processors.shutdown();
        self.publisher.shutdown();
    }

    pub fn command_submitter(self: &Arc<Self>) -> CommandSubmitter<C> {
        CommandSubmitter::new(self.clone())
    }

    /// Each functor submitter receives only its own results. Must be called
    /// inside a tokio runtime.
    pub fn functor_submitter(self: &Arc<Self>) -> FunctorSubmitter<C> {
        FunctorSubmitter::new(self.clone())
    }

    // --- accessors ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_id(&self) -> &NodeId {
        self.membership.local_id()
    }

    pub fn registry(&self) -> &Arc<CommandRegistry<C>> {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<DistributedMap<ContextId, ContextRecord<C>>> {
        &self.contexts
    }

    pub fn results(&self) -> &Arc<DistributedMap<ResultId, FunctorResult>> {
        &self.results
    }

    pub fn mediators(&self) -> &Arc<MediatorStore> {
        &self.mediators
    }

    pub fn publisher(&self) -> &Arc<ResultPublisher> {
        &self.publisher
    }

    pub fn processors(&self) -> &Arc<TaskProcessorPool> {
        &self.processors
    }

    // --- contexts ---

    /// Creates a context, or supplies the value of one that so far only has
    /// buffered submissions. Returns false if it was already registered.
    pub async fn register_context(
        &self,
        context_id: impl Into<ContextId>,
        value: C,
        strategy: ManagementStrategy,
    ) -> Result<bool, EngineError> {
        let context_id = context_id.into();
        reject_empty(&context_id)?;

        if strategy == ManagementStrategy::Local || self.handles_locally(&context_id) {
            return Ok(self.register_local(context_id, value, strategy));
        }

        let primary = self.primary_node(&context_id)?;
        let request = RegisterContextRequest {
            context_id: context_id.clone(),
            value: self.registry.codec().encode(&value)?,
            strategy,
        };
        let response: RegisterContextResponse = self
            .transport
            .post_json(primary.http_addr, ENDPOINT_REGISTER_CONTEXT, &request)
            .await?;

        match response.error {
            Some(error) => Err(EngineError::Transport(error)),
            None => Ok(response.created),
        }
    }

    pub(crate) fn register_local(&self, context_id: ContextId, value: C, strategy: ManagementStrategy) -> bool {
        let owner = self.local_id().clone();
        let (created, dispatch) = self.contexts.invoke(&context_id, |slot| match slot.as_mut() {
            Some(record) if record.is_registered() => (false, None),
            Some(record) => {
                record.strategy = strategy;
                record.owner = owner;
                (true, record.register(value))
            }
            None => {
                *slot = Some(ContextRecord::new(context_id.clone(), value, strategy, owner));
                (true, None)
            }
        });

        if created {
            tracing::info!("Registered context {} ({:?})", context_id, strategy);
        } else {
            tracing::debug!("Context {} already registered", context_id);
        }
        if let Some(pair) = dispatch {
            self.processors.dispatch(pair);
        }
        created
    }

    /// Deletes a context. Functors still waiting in its queue resolve as cancelled.
    pub async fn remove_context(&self, context_id: &ContextId) -> Result<bool, EngineError> {
        if self.handles_locally(context_id) {
            return Ok(self.remove_local(context_id).await);
        }

        let primary = self.primary_node(context_id)?;
        let response: RemoveContextResponse = self
            .transport
            .post_json(
                primary.http_addr,
                ENDPOINT_REMOVE_CONTEXT,
                &RemoveContextRequest {
                    context_id: context_id.clone(),
                },
            )
            .await?;
        Ok(response.removed)
    }

    pub(crate) async fn remove_local(&self, context_id: &ContextId) -> bool {
        let Some(mut record) = self.contexts.remove_local(context_id) else {
            return false;
        };

        let abandoned = record.queue.drain();
        tracing::info!(
            "Removed context {} ({} unfinished submission(s))",
            context_id,
            abandoned.len()
        );
        for command in abandoned {
            self.publish_cancelled(&command).await;
        }
        true
    }

    /// Current value: the local copy if this node holds the context,
    /// otherwise whatever its owner returns.
    pub async fn get_context(&self, context_id: &ContextId) -> Option<C> {
        if let Some(value) = self.contexts.inspect_local(context_id, |record| record.value.clone()) {
            return value;
        }
        self.contexts.get(context_id).await.and_then(|record| record.value)
    }

    /// Not-yet-started submissions of a locally held context, in execution order.
    pub fn queued_commands(&self, context_id: &ContextId) -> Vec<SubmissionKey> {
        self.contexts
            .inspect_local(context_id, |record| record.queue.pending_keys())
            .unwrap_or_default()
    }

    pub fn command_state(&self, key: &SubmissionKey) -> Option<SubmissionState> {
        self.contexts
            .inspect_local(&key.context_id, |record| record.queue.state_of(key))
            .flatten()
    }

    // --- submission ---

    pub async fn submit_envelope(
        &self,
        context_id: ContextId,
        envelope: CommandEnvelope,
        allow_missing_context: bool,
    ) -> Result<SubmissionKey, EngineError> {
        reject_empty(&context_id)?;

        if self.handles_locally(&context_id) {
            return self.accept_submission(context_id, envelope, allow_missing_context);
        }

        let primary = self.primary_node(&context_id)?;
        tracing::debug!("Forwarding {} for {} to {}", envelope.name, context_id, primary.id);

        let request = SubmitEnvelopeRequest {
            context_id: context_id.clone(),
            envelope,
            allow_missing_context,
        };
        let response: SubmitEnvelopeResponse = self
            .transport
            .post_json(primary.http_addr, ENDPOINT_SUBMIT, &request)
            .await?;

        match response {
            SubmitEnvelopeResponse {
                key: Some(key),
                rejected: false,
                ..
            } => Ok(key),
            SubmitEnvelopeResponse {
                rejected: true, error, ..
            } => Err(EngineError::SubmissionRejected {
                context_id,
                reason: error.unwrap_or_else(|| "rejected by primary".to_string()),
            }),
            SubmitEnvelopeResponse { error, .. } => Err(EngineError::Transport(
                error.unwrap_or_else(|| "primary returned no submission key".to_string()),
            )),
        }
    }

    /// Queues an envelope on a context held (or to be held) by this node.
    pub(crate) fn accept_submission(
        &self,
        context_id: ContextId,
        envelope: CommandEnvelope,
        allow_missing_context: bool,
    ) -> Result<SubmissionKey, EngineError> {
        self.registry.validate(&envelope)?;

        let owner = self.local_id().clone();
        let name = envelope.name.clone();
        let (key, dispatch) = self.contexts.invoke(&context_id, |slot| match slot.as_mut() {
            Some(record) => Ok(record.submit(envelope)),
            None if allow_missing_context => {
                let mut record = ContextRecord::buffered(context_id.clone(), ManagementStrategy::Distributed, owner);
                let submitted = record.submit(envelope);
                *slot = Some(record);
                Ok(submitted)
            }
            None => Err(EngineError::SubmissionRejected {
                context_id: context_id.clone(),
                reason: "context does not exist".to_string(),
            }),
        })?;

        tracing::trace!("Queued {} as {}", name, key);
        if let Some(pair) = dispatch {
            self.processors.dispatch(pair);
        }
        Ok(key)
    }

    /// Removes a submission that has not started. Returns false once it has.
    pub async fn cancel(&self, key: &SubmissionKey) -> Result<bool, EngineError> {
        if self.handles_locally(&key.context_id) {
            return Ok(self.cancel_local(key).await);
        }

        let primary = self.primary_node(&key.context_id)?;
        let response: CancelResponse = self
            .transport
            .post_json(primary.http_addr, ENDPOINT_CANCEL, &CancelRequest { key: key.clone() })
            .await?;
        Ok(response.cancelled)
    }

    pub(crate) async fn cancel_local(&self, key: &SubmissionKey) -> bool {
        let cancelled = self
            .contexts
            .invoke(&key.context_id, |slot| slot.as_mut().and_then(|record| record.queue.cancel(key)));

        match cancelled {
            Some(command) => {
                tracing::debug!("Cancelled {}", key);
                self.publish_cancelled(&command).await;
                true
            }
            None => false,
        }
    }

    async fn publish_cancelled(&self, command: &QueuedCommand) {
        let EnvelopeKind::Functor {
            result_id,
            submitter,
            origin,
        } = &command.envelope.kind
        else {
            return;
        };

        let result = FunctorResult::cancelled(result_id.clone(), submitter.clone());
        self.publisher.publish_or_park(origin, result).await;
    }

    // --- routing ---

    fn handles_locally(&self, context_id: &ContextId) -> bool {
        self.contexts.contains_local(context_id) || self.contexts.is_local_primary(context_id)
    }

    fn primary_node(&self, context_id: &ContextId) -> Result<Node, EngineError> {
        self.contexts
            .primary_owner(context_id)
            .and_then(|owner| self.membership.get_member(&owner))
            .ok_or_else(|| EngineError::Transport(format!("no reachable primary for context {}", context_id)))
    }
}

fn reject_empty(context_id: &ContextId) -> Result<(), EngineError> {
    if context_id.is_empty() {
        return Err(EngineError::SubmissionRejected {
            context_id: context_id.clone(),
            reason: "context id is empty".to_string(),
        });
    }
    Ok(())
}
