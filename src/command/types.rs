use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Cluster-unique name of a context. Hashed to pick the owning partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContextId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContextId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One queued unit of work: its context plus a per-context sequence number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubmissionKey {
    pub context_id: ContextId,
    pub sequence: u64,
}

impl SubmissionKey {
    pub fn new(context_id: ContextId, sequence: u64) -> Self {
        Self {
            context_id,
            sequence,
        }
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.context_id, self.sequence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResultId(pub String);

impl ResultId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for ResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResultId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubmitterId(pub String);

impl SubmitterId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SubmitterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task mediator queues: the key plus the functor result it feeds, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubmissionKeyPair {
    pub key: SubmissionKey,
    pub result_id: Option<ResultId>,
}

impl SubmissionKeyPair {
    pub fn new(key: SubmissionKey, result_id: Option<ResultId>) -> Self {
        Self { key, result_id }
    }

    pub fn context_id(&self) -> &ContextId {
        &self.key.context_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EnvelopeKind {
    Command,
    Functor {
        result_id: ResultId,
        submitter: SubmitterId,
        /// Node the submitter lives on; results are delivered there.
        origin: NodeId,
    },
}

/// A submitted command or functor as it sits in a context queue.
///
/// `name` is the registered type tag, `payload` the codec-encoded value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub name: String,
    pub payload: Vec<u8>,
    pub priority: bool,
    pub kind: EnvelopeKind,
}

impl CommandEnvelope {
    pub fn result_id(&self) -> Option<&ResultId> {
        match &self.kind {
            EnvelopeKind::Command => None,
            EnvelopeKind::Functor { result_id, .. } => Some(result_id),
        }
    }

    pub fn is_functor(&self) -> bool {
        matches!(self.kind, EnvelopeKind::Functor { .. })
    }
}

/// Lifecycle of one unit of work.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubmissionState {
    Queued,
    /// At the head of its queue with an execution turn scheduled on a mediator.
    Assigned,
    Executing,
    Succeeded,
    Failed,
    Cancelled,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionState::Succeeded | SubmissionState::Failed | SubmissionState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Queued, Assigned)
                | (Queued, Cancelled)
                | (Assigned, Executing)
                | (Assigned, Queued)
                | (Assigned, Cancelled)
                | (Executing, Succeeded)
                | (Executing, Failed)
                | (Executing, Queued)
        )
    }
}
