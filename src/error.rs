//! Engine error taxonomy.
//!
//! Plumbing (transport, gossip, handler closures) uses `anyhow`; everything a
//! caller of the engine can observe is an `EngineError`.

use crate::codec::CodecError;
use crate::command::types::{ContextId, ResultId, SubmissionKey};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The context does not exist and buffering was not requested.
    #[error("submission to context {context_id} rejected: {reason}")]
    SubmissionRejected { context_id: ContextId, reason: String },

    /// No handler is registered for the envelope's type tag.
    #[error("no handler registered for {name}")]
    UnknownCommand { name: String },

    #[error("command {key} failed: {reason}")]
    CommandExecutionFailed { key: SubmissionKey, reason: String },

    #[error("functor {result_id} failed: {reason}")]
    FunctorExecutionFailed { result_id: ResultId, reason: String },

    #[error("functor {result_id} was cancelled before it started")]
    FunctorCancelled { result_id: ResultId },

    /// The caller's own lease lapsed; its tasks belong to whoever adopts the mediator.
    #[error("lease on {mediator} held by {holder} has expired")]
    LeaseExpired { mediator: String, holder: String },

    #[error("lease on {mediator} is held by {holder} until {expires_at}")]
    LeaseHeld {
        mediator: String,
        holder: String,
        expires_at: u64,
    },

    #[error("command {key} has already started or no longer exists")]
    CancellationDenied { key: SubmissionKey },

    #[error("timed out after {waited_ms}ms waiting for functor {result_id}")]
    Timeout { result_id: ResultId, waited_ms: u64 },

    #[error("result channel for functor {result_id} closed before completion")]
    ResultChannelClosed { result_id: ResultId },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("cluster transport error: {0}")]
    Transport(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Transport(format!("{:#}", err))
    }
}
