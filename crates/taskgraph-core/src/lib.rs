//! # Taskgraph Core
//!
//! Core primitives for task-graph generation.
//!
//! This crate provides the fundamental building blocks:
//! - [`Graph`] - Generic directed graph with named edges
//! - [`Job`] - A unit of work identified by its label
//! - [`JobGraph`] - Jobs paired with the graph connecting them
//! - [`Parameters`] / [`GraphConfig`] - Run parameters and project configuration
//! - [`TaskgraphError`] - Error taxonomy

pub mod config;
pub mod error;
pub mod graph;
pub mod job;
pub mod job_graph;
pub mod parameters;

// Re-exports for convenience
pub use config::GraphConfig;
pub use error::{Result, TaskgraphError};
pub use graph::{Edge, Graph, Visit};
pub use job::{Job, JobId, Label, Optimization};
pub use job_graph::{JobGraph, LabelToId};
pub use parameters::Parameters;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::GraphConfig;
    pub use crate::error::{Result, TaskgraphError};
    pub use crate::graph::Graph;
    pub use crate::job::{Job, JobId, Label};
    pub use crate::job_graph::{JobGraph, LabelToId};
    pub use crate::parameters::Parameters;
}
