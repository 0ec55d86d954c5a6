use super::delivery::OutcomeReceiver;
use super::types::FunctorOutcome;
use crate::codec::Codec;
use crate::command::types::{ResultId, SubmissionKey};
use crate::error::EngineError;

use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;

/// Handle to the eventual result of a submitted functor.
///
/// Reads never re-run anything: once resolved, every `get` (on this handle or
/// a clone) decodes the same stored outcome.
pub struct FunctorFuture<T> {
    key: SubmissionKey,
    result_id: ResultId,
    codec: Codec,
    receiver: OutcomeReceiver,
    _output: PhantomData<fn() -> T>,
}

impl<T> Clone for FunctorFuture<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            result_id: self.result_id.clone(),
            codec: self.codec,
            receiver: self.receiver.clone(),
            _output: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> FunctorFuture<T> {
    pub(crate) fn new(key: SubmissionKey, result_id: ResultId, codec: Codec, receiver: OutcomeReceiver) -> Self {
        Self {
            key,
            result_id,
            codec,
            receiver,
            _output: PhantomData,
        }
    }

    pub fn submission_key(&self) -> &SubmissionKey {
        &self.key
    }

    pub fn result_id(&self) -> &ResultId {
        &self.result_id
    }

    pub fn is_done(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// `None` while the functor has not completed.
    pub fn try_get(&self) -> Option<Result<T, EngineError>> {
        let outcome = self.receiver.borrow().clone()?;
        Some(self.resolve(outcome))
    }

    pub async fn get(&self) -> Result<T, EngineError> {
        if let Some(result) = self.try_get() {
            return result;
        }

        let mut receiver = self.receiver.clone();
        let outcome = {
            let current = receiver
                .wait_for(Option::is_some)
                .await
                .map_err(|_| EngineError::ResultChannelClosed {
                    result_id: self.result_id.clone(),
                })?;
            current.clone()
        };

        match outcome {
            Some(outcome) => self.resolve(outcome),
            None => Err(EngineError::ResultChannelClosed {
                result_id: self.result_id.clone(),
            }),
        }
    }

    /// Gives up waiting after `timeout`. Delivery continues regardless, so a
    /// later `get` can still observe the result.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<T, EngineError> {
        match tokio::time::timeout(timeout, self.get()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                result_id: self.result_id.clone(),
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn resolve(&self, outcome: FunctorOutcome) -> Result<T, EngineError> {
        match outcome {
            FunctorOutcome::Value(bytes) => Ok(self.codec.decode(&bytes)?),
            FunctorOutcome::Failure(reason) => Err(EngineError::FunctorExecutionFailed {
                result_id: self.result_id.clone(),
                reason,
            }),
            FunctorOutcome::Cancelled => Err(EngineError::FunctorCancelled {
                result_id: self.result_id.clone(),
            }),
        }
    }
}
