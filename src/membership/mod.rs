//! Membership & Discovery Module
//!
//! Gossip-based membership (SWIM-like) over UDP. The engine relies on it for three
//! things: the local node identity, the sorted alive set that decides partition
//! ownership, and the HTTP address of peers for command forwarding and functor
//! result delivery.
//!
//! ## Core Mechanisms
//! - **Gossip**: each interval a random alive peer is pinged; the ack carries the full member list.
//! - **Failure Detection**: `Alive` -> `Suspect` -> `Dead` on silence timeouts.
//! - **Incarnation Numbers**: a suspected node refutes by bumping its incarnation.

pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
