//! The user-facing units of work.
//!
//! A `Command` mutates a context and returns nothing; a `Functor` mutates a
//! context and returns a value to its submitter. Both are plain serde types
//! with a static `NAME` that the registry dispatches on.

use crate::context::environment::ExecutionEnvironment;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub trait Command<C>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag; must be unique within a registry.
    const NAME: &'static str;

    /// Returning `Err` (or panicking) discards every change made through `env`.
    fn execute(&self, env: &mut ExecutionEnvironment<C>) -> anyhow::Result<()>;

    /// Priority commands are inserted at the head of the context queue.
    fn is_priority(&self) -> bool {
        false
    }
}

pub trait Functor<C>: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    type Output: Serialize + DeserializeOwned + Send + 'static;

    fn execute(&self, env: &mut ExecutionEnvironment<C>) -> anyhow::Result<Self::Output>;

    fn is_priority(&self) -> bool {
        false
    }
}

/// Wraps a command or functor so it jumps ahead of everything not yet started.
///
/// Serializes exactly like the wrapped value and shares its `NAME`, so only the
/// inner type needs registering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Priority<T>(pub T);

impl<C, T: Command<C>> Command<C> for Priority<T> {
    const NAME: &'static str = T::NAME;

    fn execute(&self, env: &mut ExecutionEnvironment<C>) -> anyhow::Result<()> {
        self.0.execute(env)
    }

    fn is_priority(&self) -> bool {
        true
    }
}

impl<C, F: Functor<C>> Functor<C> for Priority<F> {
    const NAME: &'static str = F::NAME;

    type Output = F::Output;

    fn execute(&self, env: &mut ExecutionEnvironment<C>) -> anyhow::Result<Self::Output> {
        self.0.execute(env)
    }

    fn is_priority(&self) -> bool {
        true
    }
}
