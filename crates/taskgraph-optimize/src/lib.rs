//! # Taskgraph Optimize
//!
//! Optimization of target job graphs.
//!
//! - [`OptimizationStrategy`] / [`StrategyRegistry`] - per-job removal and replacement policies
//! - [`IndexLookup`] / [`VcsDiff`] - the backends strategies consult
//! - [`Optimizer`] - removal, replacement and finalization phases
//! - [`resolve_references`] - late binding of job ids into payloads

pub mod files_changed;
pub mod index;
pub mod optimizer;
pub mod resolver;
pub mod strategy;

pub use files_changed::{ChangedFiles, GlobPattern, RevisionRange, VcsDiff};
pub use index::{InMemoryIndex, IndexLookup};
pub use optimizer::{optimize_job_graph, Optimizer};
pub use resolver::{resolve_references, ReferenceContext};
pub use strategy::{ArgSplitter, Composite, OptimizationStrategy, Replacement, StrategyRegistry};
