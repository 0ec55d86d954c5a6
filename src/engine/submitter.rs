use super::engine::CommandEngine;
use crate::command::pattern::{Command, Functor};
use crate::command::types::{ContextId, ResultId, SubmissionKey, SubmissionState, SubmitterId};
use crate::context::types::ContextValue;
use crate::error::EngineError;
use crate::functor::delivery::ResultDelivery;
use crate::functor::future::FunctorFuture;

use std::sync::Arc;

/// Submits commands; nothing comes back but the submission key.
pub struct CommandSubmitter<C> {
    engine: Arc<CommandEngine<C>>,
}

impl<C> Clone for CommandSubmitter<C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<C: ContextValue> CommandSubmitter<C> {
    pub fn new(engine: Arc<CommandEngine<C>>) -> Self {
        Self { engine }
    }

    /// Fails with `SubmissionRejected` if the context does not exist.
    pub async fn submit_command<T: Command<C>>(
        &self,
        context_id: impl Into<ContextId>,
        command: T,
    ) -> Result<SubmissionKey, EngineError> {
        self.submit_command_with(context_id, command, false).await
    }

    /// With `allow_missing_context`, a submission to an unknown context is
    /// buffered and runs once the context is registered.
    pub async fn submit_command_with<T: Command<C>>(
        &self,
        context_id: impl Into<ContextId>,
        command: T,
        allow_missing_context: bool,
    ) -> Result<SubmissionKey, EngineError> {
        let envelope = self.engine.registry().command_envelope(&command)?;
        self.engine
            .submit_envelope(context_id.into(), envelope, allow_missing_context)
            .await
    }

    /// True only if the command had not started; it will then never run.
    pub async fn cancel_command(&self, key: &SubmissionKey) -> Result<bool, EngineError> {
        self.engine.cancel(key).await
    }

    /// Like `cancel_command`, but reports a command that already started as
    /// `CancellationDenied`.
    pub async fn try_cancel_command(&self, key: &SubmissionKey) -> Result<(), EngineError> {
        if self.engine.cancel(key).await? {
            Ok(())
        } else {
            Err(EngineError::CancellationDenied { key: key.clone() })
        }
    }

    pub fn command_state(&self, key: &SubmissionKey) -> Option<SubmissionState> {
        self.engine.command_state(key)
    }
}

/// Submits functors and hands back futures for their results.
///
/// Owns a `ResultDelivery` subscription; dropping the last clone stops
/// delivery, and futures still waiting then fail with `ResultChannelClosed`.
pub struct FunctorSubmitter<C> {
    engine: Arc<CommandEngine<C>>,
    submitter_id: SubmitterId,
    delivery: Arc<ResultDelivery>,
}

impl<C> Clone for FunctorSubmitter<C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            submitter_id: self.submitter_id.clone(),
            delivery: self.delivery.clone(),
        }
    }
}

impl<C: ContextValue> FunctorSubmitter<C> {
    pub fn new(engine: Arc<CommandEngine<C>>) -> Self {
        let submitter_id = SubmitterId::new();
        let delivery = ResultDelivery::start(submitter_id.clone(), engine.results().clone());
        Self {
            engine,
            submitter_id,
            delivery,
        }
    }

    pub async fn submit_functor<F: Functor<C>>(
        &self,
        context_id: impl Into<ContextId>,
        functor: F,
    ) -> Result<FunctorFuture<F::Output>, EngineError> {
        self.submit_functor_with(context_id, functor, false).await
    }

    pub async fn submit_functor_with<F: Functor<C>>(
        &self,
        context_id: impl Into<ContextId>,
        functor: F,
        allow_missing_context: bool,
    ) -> Result<FunctorFuture<F::Output>, EngineError> {
        let result_id = ResultId::new();
        let envelope = self.engine.registry().functor_envelope(
            &functor,
            result_id.clone(),
            self.submitter_id.clone(),
            self.engine.local_id().clone(),
        )?;

        // Registered first so a fast result cannot arrive before anyone listens.
        let receiver = self.delivery.register(result_id.clone());

        match self
            .engine
            .submit_envelope(context_id.into(), envelope, allow_missing_context)
            .await
        {
            Ok(key) => Ok(FunctorFuture::new(
                key,
                result_id,
                self.engine.registry().codec(),
                receiver,
            )),
            Err(e) => {
                self.delivery.forget(&result_id);
                Err(e)
            }
        }
    }

    /// Cancels a functor that has not started; its future resolves to
    /// `FunctorCancelled`.
    pub async fn cancel_functor(&self, key: &SubmissionKey) -> Result<bool, EngineError> {
        self.engine.cancel(key).await
    }

    pub fn submitter_id(&self) -> &SubmitterId {
        &self.submitter_id
    }

    /// Futures of this submitter that have not resolved yet.
    pub fn outstanding(&self) -> usize {
        self.delivery.outstanding()
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivery.delivered_count()
    }
}
