use crate::command::types::{ContextId, SubmissionKey};

/// What a command sees while it runs: a private working copy of the context
/// value. The copy is persisted only if the command returns `Ok`.
#[derive(Debug, Clone)]
pub struct ExecutionEnvironment<C> {
    context_id: ContextId,
    submission_key: SubmissionKey,
    context: C,
    recovered: bool,
}

impl<C> ExecutionEnvironment<C> {
    pub fn new(context_id: ContextId, submission_key: SubmissionKey, context: C, recovered: bool) -> Self {
        Self {
            context_id,
            submission_key,
            context,
            recovered,
        }
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    pub fn submission_key(&self) -> &SubmissionKey {
        &self.submission_key
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    pub fn set_context(&mut self, value: C) {
        self.context = value;
    }

    /// True when this is a re-run of a command whose previous attempt never committed.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn into_context(self) -> C {
        self.context
    }
}
