//! Distributed Command Execution Cluster Library
//!
//! This library crate defines the modules that make up a node of the command
//! execution cluster. It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`membership`**: UDP gossip (SWIM-like) node discovery and failure detection.
//! - **`storage`**: partitioned in-memory key-value store (`DistributedMap`) with atomic
//!   `invoke` and predicate-filtered entry events.
//! - **`cluster`**: HTTP transport, inter-node protocol and axum handlers.
//! - **`command`**: identifiers, the `Command`/`Functor` traits and the dispatch registry.
//! - **`context`**: context records, their per-context queues and the execution turn.
//! - **`functor`**: functor results, futures and the result delivery channel.
//! - **`processing`**: per-worker task mediators, leases, the lease monitor and the worker pool.
//! - **`engine`**: the node-level handle plus `CommandSubmitter` / `FunctorSubmitter`.

pub mod cluster;
pub mod codec;
pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod functor;
pub mod membership;
pub mod processing;
pub mod storage;
