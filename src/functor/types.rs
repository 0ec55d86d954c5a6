use crate::command::types::{ResultId, SubmitterId};
use serde::{Deserialize, Serialize};

/// How a functor finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctorOutcome {
    /// Codec-encoded return value.
    Value(Vec<u8>),
    /// The rendered error chain of a failed or panicked `execute`.
    Failure(String),
    /// Cancelled, or its context was removed, before it started.
    Cancelled,
}

/// Completion record kept in the shared result store until its submitter
/// has consumed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctorResult {
    pub result_id: ResultId,
    pub submitter_id: SubmitterId,
    pub complete: bool,
    pub outcome: Option<FunctorOutcome>,
}

impl FunctorResult {
    pub fn pending(result_id: ResultId, submitter_id: SubmitterId) -> Self {
        Self {
            result_id,
            submitter_id,
            complete: false,
            outcome: None,
        }
    }

    pub fn completed(result_id: ResultId, submitter_id: SubmitterId, outcome: FunctorOutcome) -> Self {
        Self {
            result_id,
            submitter_id,
            complete: true,
            outcome: Some(outcome),
        }
    }

    pub fn cancelled(result_id: ResultId, submitter_id: SubmitterId) -> Self {
        Self::completed(result_id, submitter_id, FunctorOutcome::Cancelled)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Some(FunctorOutcome::Value(_)))
    }
}
