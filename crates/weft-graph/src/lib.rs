//! Directed dependency graph with asynchronous trace jobs.
//!
//! The graph discovers nodes by asking an injected provider for each node's
//! dependencies, splicing the results in as they arrive. Liveness is anchored
//! by permanent roots: pruning removes a node together with every successor
//! that the remaining roots can no longer reach.

mod graph;

pub use graph::{DependencyGraph, DependencyProvider, GraphEvent, Node};
