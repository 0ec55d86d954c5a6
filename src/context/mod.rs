//! Contexts and their command queues.
//!
//! A context is a named value plus the FIFO of work submitted against it,
//! stored together as one `ContextRecord` so that running a command and
//! removing it from the queue is a single atomic update.
//!
//! ## Execution turns
//! The queue hands out one turn token at a time. Holding the token is what
//! entitles a worker to run the head command, which keeps every context
//! single-writer no matter how many workers exist. See `ContextExecutor`.

pub mod environment;
pub mod executor;
pub mod types;

#[cfg(test)]
mod tests;
