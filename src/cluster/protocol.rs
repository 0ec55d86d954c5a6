//! Engine Network Protocol
//!
//! Endpoints a node calls on the primary of a context (submission, cancel,
//! registration, removal) and on the submitter's node (result delivery).

use crate::command::types::{CommandEnvelope, ContextId, SubmissionKey};
use crate::context::types::ManagementStrategy;
use crate::functor::types::FunctorResult;

use serde::{Deserialize, Serialize};

pub const ENDPOINT_SUBMIT: &str = "/internal/commands/submit";
pub const ENDPOINT_CANCEL: &str = "/internal/commands/cancel";
pub const ENDPOINT_REGISTER_CONTEXT: &str = "/internal/contexts/register";
pub const ENDPOINT_REMOVE_CONTEXT: &str = "/internal/contexts/remove";
/// Completed functor results are pushed to the node their submitter lives on.
pub const ENDPOINT_DELIVER_RESULT: &str = "/internal/functors/result";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitEnvelopeRequest {
    pub context_id: ContextId,
    pub envelope: CommandEnvelope,
    pub allow_missing_context: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitEnvelopeResponse {
    pub key: Option<SubmissionKey>,
    /// Set when the primary refused the submission; `error` says why.
    pub rejected: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelRequest {
    pub key: SubmissionKey,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterContextRequest {
    pub context_id: ContextId,
    /// Context value encoded with the cluster codec.
    pub value: Vec<u8>,
    pub strategy: ManagementStrategy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterContextResponse {
    pub created: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveContextRequest {
    pub context_id: ContextId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveContextResponse {
    pub removed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliverResultRequest {
    pub result: FunctorResult,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliverResultResponse {
    /// False when a completed record for the same id was already present.
    pub accepted: bool,
}
