//! Engine Module
//!
//! `CommandEngine` is the explicit per-node handle that replaces any notion
//! of a process-wide default instance: construct it once with its
//! collaborators, start it, and hand out `CommandSubmitter` /
//! `FunctorSubmitter` values to callers.
//!
//! ## Submission path
//! 1. The submitter encodes the command into a `CommandEnvelope` using the registry.
//! 2. The engine queues it on the context's node, forwarding over HTTP when
//!    another node is the context's primary.
//! 3. If that made the context runnable, its turn token goes to the worker pool.

pub mod engine;
pub mod submitter;
