//! Runs one execution turn for a context.

use super::environment::ExecutionEnvironment;
use super::types::{ContextRecord, ContextValue, TurnEnd, TurnStart};
use crate::command::registry::CommandRegistry;
use crate::command::types::{ContextId, EnvelopeKind, SubmissionKeyPair};
use crate::error::EngineError;
use crate::functor::publisher::ResultPublisher;
use crate::functor::types::{FunctorOutcome, FunctorResult};
use crate::processing::types::TaskOutcome;
use crate::storage::memory::DistributedMap;

use anyhow::anyhow;
use std::sync::Arc;

pub struct ContextExecutor<C> {
    contexts: Arc<DistributedMap<ContextId, ContextRecord<C>>>,
    registry: Arc<CommandRegistry<C>>,
    publisher: Arc<ResultPublisher>,
}

impl<C: ContextValue> ContextExecutor<C> {
    pub fn new(
        contexts: Arc<DistributedMap<ContextId, ContextRecord<C>>>,
        registry: Arc<CommandRegistry<C>>,
        publisher: Arc<ResultPublisher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            contexts,
            registry,
            publisher,
        })
    }

    /// Executes the command the token entitles its holder to.
    ///
    /// 1. Start the turn (moves the head into `executing`, snapshots the value).
    /// 2. Run the handler on a blocking thread against a working copy.
    /// 3. Publish the functor result, if any.
    /// 4. Commit: store the working copy on success and advance the queue.
    ///
    /// Dropping the returned future before step 4 leaves the command in
    /// `executing`; the next holder of the token re-runs it.
    pub async fn run_turn(self: Arc<Self>, token: SubmissionKeyPair) -> TaskOutcome {
        let start = self.contexts.invoke(token.context_id(), |slot| match slot.as_mut() {
            Some(record) => record.begin_turn(&token.key),
            None => TurnStart::Stale,
        });

        let turn = match start {
            TurnStart::Run(turn) => turn,
            TurnStart::Idle => {
                tracing::trace!("No work left on {}", token.context_id());
                return TaskOutcome::nothing_to_do();
            }
            TurnStart::Stale => {
                tracing::debug!("Dropping stale turn token {}", token.key);
                return TaskOutcome::nothing_to_do();
            }
        };

        let key = turn.command.key.clone();
        let envelope = turn.command.envelope;
        if turn.recovered {
            tracing::info!("Resuming {} ({}) after an interrupted attempt", key, envelope.name);
        }

        let env = ExecutionEnvironment::new(key.context_id.clone(), key.clone(), turn.snapshot, turn.recovered);
        let executed = {
            let registry = self.registry.clone();
            let job = envelope.clone();
            tokio::task::spawn_blocking(move || -> anyhow::Result<(C, Option<Vec<u8>>)> {
                let mut env = env;
                let output = registry.execute(&job, &mut env)?;
                Ok((env.into_context(), output))
            })
            .await
            .unwrap_or_else(|e| {
                if e.is_panic() {
                    Err(anyhow!("{} panicked during execute", envelope.name))
                } else {
                    Err(anyhow!("execution of {} was aborted", envelope.name))
                }
            })
        };

        let (new_value, output) = match executed {
            Ok((value, output)) => (Some(value), Ok(output)),
            Err(e) => {
                let failure = EngineError::CommandExecutionFailed {
                    key: key.clone(),
                    reason: format!("{:#}", e),
                };
                tracing::error!("{}", failure);
                (None, Err(e))
            }
        };

        if let EnvelopeKind::Functor {
            result_id,
            submitter,
            origin,
        } = &envelope.kind
        {
            let outcome = match output {
                Ok(Some(bytes)) => FunctorOutcome::Value(bytes),
                Ok(None) => FunctorOutcome::Failure(format!("{} produced no output", envelope.name)),
                Err(e) => FunctorOutcome::Failure(format!("{:#}", e)),
            };
            let result = FunctorResult::completed(result_id.clone(), submitter.clone(), outcome);
            self.publisher.publish_or_park(origin, result).await;
        }

        let succeeded = new_value.is_some();
        let end = self.contexts.invoke(&key.context_id, |slot| match slot.as_mut() {
            Some(record) => record.finish_turn(&key, turn.attempt, new_value),
            None => TurnEnd::Stale,
        });

        match end {
            TurnEnd::Committed { follow_up } => {
                tracing::trace!("Committed {} (attempt {})", key, turn.attempt);
                TaskOutcome { succeeded, follow_up }
            }
            TurnEnd::Stale => {
                tracing::warn!("Attempt {} of {} was superseded; discarding its outcome", turn.attempt, key);
                TaskOutcome::nothing_to_do()
            }
        }
    }
}
