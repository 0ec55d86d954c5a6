//! Distributed Storage Module
//!
//! Partitioned in-memory key-value store hosting context records, functor
//! results and task mediator state.
//!
//! ## Core Concepts
//! - **Partitioning**: keys hash into a fixed number of partitions.
//! - **Placement**: `PartitionManager` assigns each partition a primary (plus backup) from the alive set.
//! - **Atomic operations**: `DistributedMap::invoke` runs a read-modify-write on one key under the partition lock.
//! - **Events**: insert/update/remove snapshots, delivered to listeners whose predicate accepts them.

pub mod events;
pub mod handlers;
pub mod memory;
pub mod partitioner;
pub mod protocol;
