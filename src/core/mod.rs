//! Core pipeline: types, schemas, graph, resolution, compilation, execution.

pub mod compiler;
pub mod error;
pub mod executor;
pub mod graph;
pub mod parser;
pub mod resolver;
pub mod schema;
pub mod types;
