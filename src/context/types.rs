use crate::command::types::{
    CommandEnvelope, ContextId, SubmissionKey, SubmissionKeyPair, SubmissionState,
};
use crate::membership::types::NodeId;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bound every context value type satisfies.
pub trait ContextValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> ContextValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Where a context record lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementStrategy {
    /// On the partition primary of the context id.
    #[default]
    Distributed,
    /// On the node that registered it; never forwarded.
    Local,
}

/// Finished submissions remembered per context for state queries.
pub const RECENT_OUTCOMES: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub key: SubmissionKey,
    pub envelope: CommandEnvelope,
}

impl QueuedCommand {
    pub fn pair(&self) -> SubmissionKeyPair {
        SubmissionKeyPair::new(self.key.clone(), self.envelope.result_id().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutingCommand {
    pub command: QueuedCommand,
    pub attempt: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueueTurn {
    Run {
        command: QueuedCommand,
        attempt: u64,
        recovered: bool,
    },
    /// Nothing left to run; the token was released.
    Idle,
    /// The presented token is not the context's current token.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEnd {
    Committed { follow_up: Option<SubmissionKeyPair> },
    /// A newer attempt owns the executing command; nothing was changed.
    Stale,
}

/// Per-context queue.
///
/// At most one turn token is outstanding per context. Whoever presents the
/// current token may start the next command; the token moves to the new head
/// when that command finishes. Each start bumps the attempt counter and only
/// the latest attempt may finish, so a resumed command can never be committed
/// twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandQueue {
    last_sequence: u64,
    pending: VecDeque<QueuedCommand>,
    executing: Option<ExecutingCommand>,
    token: Option<SubmissionKey>,
    attempts: u64,
    executed: u64,
    recent: VecDeque<(u64, SubmissionState)>,
}

impl CommandQueue {
    pub fn allocate_key(&mut self, context_id: &ContextId) -> SubmissionKey {
        self.last_sequence += 1;
        SubmissionKey::new(context_id.clone(), self.last_sequence)
    }

    pub fn push(&mut self, command: QueuedCommand) {
        if command.envelope.priority {
            self.pending.push_front(command);
        } else {
            self.pending.push_back(command);
        }
    }

    /// Issues the turn token if work is waiting and no token is outstanding.
    pub fn schedule(&mut self) -> Option<SubmissionKeyPair> {
        if self.token.is_some() {
            return None;
        }
        let head = match &self.executing {
            Some(executing) => &executing.command,
            None => self.pending.front()?,
        };
        let pair = head.pair();
        self.token = Some(pair.key.clone());
        Some(pair)
    }

    /// Removes a command that has not started yet.
    pub fn cancel(&mut self, key: &SubmissionKey) -> Option<QueuedCommand> {
        if !self.state_of(key)?.can_transition_to(SubmissionState::Cancelled) {
            return None;
        }
        let position = self.pending.iter().position(|command| &command.key == key)?;
        let command = self.pending.remove(position)?;
        self.remember(key.sequence, SubmissionState::Cancelled);
        Some(command)
    }

    pub fn begin(&mut self, token: &SubmissionKey) -> QueueTurn {
        if self.token.as_ref() != Some(token) {
            return QueueTurn::Stale;
        }

        self.attempts += 1;
        let attempt = self.attempts;

        if let Some(executing) = self.executing.as_mut() {
            executing.attempt = attempt;
            return QueueTurn::Run {
                command: executing.command.clone(),
                attempt,
                recovered: true,
            };
        }

        match self.pending.pop_front() {
            Some(command) => {
                self.executing = Some(ExecutingCommand {
                    command: command.clone(),
                    attempt,
                });
                QueueTurn::Run {
                    command,
                    attempt,
                    recovered: false,
                }
            }
            None => {
                self.token = None;
                QueueTurn::Idle
            }
        }
    }

    pub fn finish(&mut self, key: &SubmissionKey, attempt: u64, succeeded: bool) -> TurnEnd {
        match &self.executing {
            Some(executing) if executing.command.key == *key && executing.attempt == attempt => {}
            _ => return TurnEnd::Stale,
        }

        let outcome = if succeeded {
            SubmissionState::Succeeded
        } else {
            SubmissionState::Failed
        };
        debug_assert!(
            self.state_of(key)
                .is_some_and(|state| state.can_transition_to(outcome))
        );

        self.executing = None;
        self.executed += 1;
        self.remember(key.sequence, outcome);

        let follow_up = self.pending.front().map(QueuedCommand::pair);
        self.token = follow_up.as_ref().map(|pair| pair.key.clone());
        TurnEnd::Committed { follow_up }
    }

    /// Empties the queue, returning everything that never completed.
    pub fn drain(&mut self) -> Vec<QueuedCommand> {
        self.token = None;
        let mut drained: Vec<QueuedCommand> = self
            .executing
            .take()
            .map(|executing| executing.command)
            .into_iter()
            .collect();
        drained.extend(self.pending.drain(..));
        drained
    }

    pub fn state_of(&self, key: &SubmissionKey) -> Option<SubmissionState> {
        if self
            .executing
            .as_ref()
            .is_some_and(|executing| executing.command.key == *key)
        {
            return Some(SubmissionState::Executing);
        }

        if let Some(position) = self.pending.iter().position(|command| &command.key == key) {
            let assigned = position == 0 && self.executing.is_none() && self.token.is_some();
            return Some(if assigned {
                SubmissionState::Assigned
            } else {
                SubmissionState::Queued
            });
        }

        self.recent
            .iter()
            .rev()
            .find(|(sequence, _)| *sequence == key.sequence)
            .map(|(_, state)| *state)
    }

    fn remember(&mut self, sequence: u64, state: SubmissionState) {
        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back((sequence, state));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Not-yet-started keys in execution order.
    pub fn pending_keys(&self) -> Vec<SubmissionKey> {
        self.pending.iter().map(|command| command.key.clone()).collect()
    }

    pub fn executing(&self) -> Option<&QueuedCommand> {
        self.executing.as_ref().map(|executing| &executing.command)
    }

    pub fn token(&self) -> Option<&SubmissionKey> {
        self.token.as_ref()
    }

    /// Commands that finished, successfully or not.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.executing.is_none()
    }
}

/// One execution turn handed to a worker.
#[derive(Debug, Clone)]
pub struct Turn<C> {
    pub command: QueuedCommand,
    pub attempt: u64,
    pub recovered: bool,
    /// Value as of the start of the turn.
    pub snapshot: C,
}

#[derive(Debug, Clone)]
pub enum TurnStart<C> {
    Run(Turn<C>),
    Idle,
    Stale,
}

/// The stored form of a context: its value and its command queue, updated
/// together through `DistributedMap::invoke`.
///
/// `value` is `None` while the context is only known through buffered
/// submissions and has not been registered yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord<C> {
    pub id: ContextId,
    pub value: Option<C>,
    pub strategy: ManagementStrategy,
    pub owner: NodeId,
    pub queue: CommandQueue,
}

impl<C: Clone> ContextRecord<C> {
    pub fn new(id: ContextId, value: C, strategy: ManagementStrategy, owner: NodeId) -> Self {
        Self {
            id,
            value: Some(value),
            strategy,
            owner,
            queue: CommandQueue::default(),
        }
    }

    pub fn buffered(id: ContextId, strategy: ManagementStrategy, owner: NodeId) -> Self {
        Self {
            id,
            value: None,
            strategy,
            owner,
            queue: CommandQueue::default(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.value.is_some()
    }

    /// Queues an envelope; returns its key and the turn token to dispatch, if
    /// this submission is what made the context runnable.
    pub fn submit(&mut self, envelope: CommandEnvelope) -> (SubmissionKey, Option<SubmissionKeyPair>) {
        let key = self.queue.allocate_key(&self.id);
        self.queue.push(QueuedCommand {
            key: key.clone(),
            envelope,
        });

        let dispatch = if self.is_registered() {
            self.queue.schedule()
        } else {
            None
        };
        (key, dispatch)
    }

    /// Supplies the value of a buffered context and releases its queue.
    pub fn register(&mut self, value: C) -> Option<SubmissionKeyPair> {
        self.value = Some(value);
        self.queue.schedule()
    }

    pub fn begin_turn(&mut self, token: &SubmissionKey) -> TurnStart<C> {
        let Some(value) = self.value.as_ref() else {
            return TurnStart::Stale;
        };

        match self.queue.begin(token) {
            QueueTurn::Run {
                command,
                attempt,
                recovered,
            } => TurnStart::Run(Turn {
                command,
                attempt,
                recovered,
                snapshot: value.clone(),
            }),
            QueueTurn::Idle => TurnStart::Idle,
            QueueTurn::Stale => TurnStart::Stale,
        }
    }

    /// `outcome` is the new value on success, `None` on failure.
    pub fn finish_turn(&mut self, key: &SubmissionKey, attempt: u64, outcome: Option<C>) -> TurnEnd {
        let end = self.queue.finish(key, attempt, outcome.is_some());
        if let (TurnEnd::Committed { .. }, Some(value)) = (&end, outcome) {
            self.value = Some(value);
        }
        end
    }
}
