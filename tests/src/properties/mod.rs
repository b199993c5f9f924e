//! Invariants checked against single components or the simulation.

pub mod connection;
pub mod election;
pub mod store;
