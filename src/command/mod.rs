//! Commands and Functors
//!
//! Identifiers for submitted work, the `Command` / `Functor` traits, the
//! `Priority` wrapper, the envelope that carries a submission through the
//! cluster, and the registry that turns an envelope back into a typed call.

pub mod pattern;
pub mod registry;
pub mod types;
