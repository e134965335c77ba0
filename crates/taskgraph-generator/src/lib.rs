//! # Taskgraph Generator
//!
//! Turns kinds into an optimized, submission-ready job graph.
//!
//! - [`Kind`] / [`KindLoader`] / [`Transform`] - where jobs come from
//! - [`TargetFilter`] - which jobs a run wants
//! - [`Morph`] - backend-specific rewrites of the optimized graph
//! - [`Verification`] - checks run on every phase
//! - [`Generator`] - the lazily computed phase pipeline

pub mod filter;
pub mod generator;
pub mod kind;
pub mod morph;
pub mod verify;

pub use filter::{KindFilter, StandardFilter, TargetFilter};
pub use generator::{Generator, DEFAULT_DECISION_JOB_ID};
pub use kind::{kind_graph, load_order, ConfigJobsLoader, Kind, KindConfig, KindLoader, Transform, TransformContext};
pub use morph::Morph;
pub use verify::{MaxDependencies, Phase, Verification};
