//! Functor Result Delivery
//!
//! A functor's worker writes a `FunctorResult` into the result store of the
//! submitter's node. Each `FunctorSubmitter` owns a `ResultDelivery` that
//! listens for records tagged with its id and resolves the matching
//! `FunctorFuture`.
//!
//! ## Guarantees
//! - **Idempotent**: a result id resolves at most once; later notifications
//!   for it are dropped.
//! - **Consumed**: the shared record is removed after delivery.
//! - **Unordered**: results for different functors arrive in any order.

pub mod delivery;
pub mod future;
pub mod publisher;
pub mod types;

#[cfg(test)]
mod tests;
