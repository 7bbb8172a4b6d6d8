//! Derivation Graph
//!
//! The graph that tracks which derived signals read from which signals.
//!
//! # Overview
//!
//! The graph is a DAG where:
//!
//! - Nodes represent signals (sources or derived)
//! - Edges represent dependencies: if D reads from S, there is an edge S -> D
//!
//! When a source is written, the store asks the graph for every affected
//! derived node in topological order and recomputes them synchronously.
//! Declaring dependencies by name up front (a derived signal may only name
//! signals that already exist) keeps the graph acyclic by construction.

mod node;
mod topology;

pub use node::{DirtyState, Node, NodeId, NodeKind};
pub use topology::DerivationGraph;
