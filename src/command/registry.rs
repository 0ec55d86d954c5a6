//! Command Dispatch Registry
//!
//! Maps a type tag (`Command::NAME` / `Functor::NAME`) to a monomorphized
//! handler that decodes the payload and calls the typed `execute`. Registration
//! happens once at startup; an envelope whose tag is not registered is refused
//! at submission time instead of failing on a worker later.

use super::pattern::{Command, Functor};
use super::types::{CommandEnvelope, EnvelopeKind, ResultId, SubmitterId};
use crate::codec::Codec;
use crate::context::environment::ExecutionEnvironment;
use crate::error::EngineError;
use crate::membership::types::NodeId;

use anyhow::{Result, anyhow};
use dashmap::DashMap;
use std::sync::Arc;

/// Decodes a payload and runs it. Functor handlers return the encoded output.
pub type CommandHandlerFn<C> =
    Arc<dyn Fn(&[u8], &mut ExecutionEnvironment<C>) -> Result<Option<Vec<u8>>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Command,
    Functor,
}

struct RegisteredHandler<C> {
    kind: HandlerKind,
    handler: CommandHandlerFn<C>,
}

pub struct CommandRegistry<C> {
    handlers: DashMap<String, RegisteredHandler<C>>,
    codec: Codec,
}

impl<C: Send + 'static> CommandRegistry<C> {
    pub fn new(codec: Codec) -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            codec,
        })
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn register_command<T: Command<C>>(&self) {
        let codec = self.codec;
        let handler: CommandHandlerFn<C> = Arc::new(move |payload, env| {
            let command: T = codec.decode(payload)?;
            command.execute(env)?;
            Ok(None)
        });

        self.insert(T::NAME, HandlerKind::Command, handler);
    }

    pub fn register_functor<F: Functor<C>>(&self) {
        let codec = self.codec;
        let handler: CommandHandlerFn<C> = Arc::new(move |payload, env| {
            let functor: F = codec.decode(payload)?;
            let output = functor.execute(env)?;
            Ok(Some(codec.encode(&output)?))
        });

        self.insert(F::NAME, HandlerKind::Functor, handler);
    }

    fn insert(&self, name: &str, kind: HandlerKind, handler: CommandHandlerFn<C>) {
        if self
            .handlers
            .insert(name.to_string(), RegisteredHandler { kind, handler })
            .is_some()
        {
            tracing::warn!("Replaced existing {:?} handler {}", kind, name);
        } else {
            tracing::info!("Registered {:?} handler: {}", kind, name);
        }
    }

    pub fn command_envelope<T: Command<C>>(&self, command: &T) -> Result<CommandEnvelope, EngineError> {
        let envelope = CommandEnvelope {
            name: T::NAME.to_string(),
            payload: self.codec.encode(command)?,
            priority: command.is_priority(),
            kind: EnvelopeKind::Command,
        };
        self.validate(&envelope)?;
        Ok(envelope)
    }

    pub fn functor_envelope<F: Functor<C>>(
        &self,
        functor: &F,
        result_id: ResultId,
        submitter: SubmitterId,
        origin: NodeId,
    ) -> Result<CommandEnvelope, EngineError> {
        let envelope = CommandEnvelope {
            name: F::NAME.to_string(),
            payload: self.codec.encode(functor)?,
            priority: functor.is_priority(),
            kind: EnvelopeKind::Functor {
                result_id,
                submitter,
                origin,
            },
        };
        self.validate(&envelope)?;
        Ok(envelope)
    }

    /// Checks that the tag is registered with the envelope's kind.
    pub fn validate(&self, envelope: &CommandEnvelope) -> Result<(), EngineError> {
        let expected = if envelope.is_functor() {
            HandlerKind::Functor
        } else {
            HandlerKind::Command
        };

        match self.handlers.get(&envelope.name) {
            Some(registered) if registered.kind == expected => Ok(()),
            _ => Err(EngineError::UnknownCommand {
                name: envelope.name.clone(),
            }),
        }
    }

    pub fn execute(
        &self,
        envelope: &CommandEnvelope,
        env: &mut ExecutionEnvironment<C>,
    ) -> Result<Option<Vec<u8>>> {
        let handler = self
            .handlers
            .get(&envelope.name)
            .map(|registered| registered.handler.clone())
            .ok_or_else(|| anyhow!("Unknown command handler: {}", envelope.name))?;

        tracing::trace!(
            "Executing {} on {} ({} payload bytes)",
            envelope.name,
            env.context_id(),
            envelope.payload.len()
        );
        handler(envelope.payload.as_slice(), env)
    }

    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
            codec: Codec::default(),
        }
    }
}
