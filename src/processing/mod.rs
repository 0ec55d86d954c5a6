//! Task Processing Module
//!
//! Turns queued context work into running execution turns across a set of
//! workers, and keeps that work alive when a worker dies.
//!
//! ## Architecture Overview
//! 1. **Mediators**: every worker owns a `TaskProcessorMediator`, a FIFO of
//!    turn tokens plus the set of tokens it is currently running, stored in a
//!    `DistributedMap` and keyed by `(queue, slot, worker)`.
//! 2. **Leases**: a worker may only consume its queue while it holds the
//!    mediator's lease. Leases are renewed in the background and tracked by
//!    the `LeaseMonitor`.
//! 3. **Adoption**: when a lease lapses, the pool takes the lease over on
//!    behalf of a live worker, drains the orphaned queue (in-progress and
//!    queued tokens alike) into it and removes the orphan.
//!
//! Re-running a drained in-progress token is safe: the context queue only
//! commits the newest attempt of a command.

pub mod mediator;
pub mod monitor;
pub mod pool;
pub mod types;
