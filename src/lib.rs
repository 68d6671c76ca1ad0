//! cloudplan: declare cloud resources, resolve references, compile plans.
//!
//! Resources are declared into a graph, references between them become
//! dependency edges, and the graph compiles to one deterministic order.
//! Cycles and dangling references are rejected before anything runs.

pub mod cli;
pub mod core;
pub mod provenance;
pub mod provider;
