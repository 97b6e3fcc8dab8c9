//! Builds dependency graphs from value requirements.

pub mod error;
pub mod graph;
pub mod resolve;

pub use error::ResolutionError;
pub use graph::{DependencyGraph, DependencyNode, InputBinding, NodeId};
pub use resolve::Resolver;
