//! Error types for task-graph generation and optimization.

use thiserror::Error;

/// Main error type for task-graph operations.
///
/// Every variant is fatal to a generation run; there is no partial mode.
#[derive(Error, Debug)]
pub enum TaskgraphError {
    /// A kind's configuration (or a transformed task document) is malformed.
    #[error("Configuration error in {context}: {message}")]
    Config { context: String, message: String },

    /// A closure was requested over nodes that are not in the graph.
    #[error("Unknown nodes: {}", .nodes.join(", "))]
    UnknownNode { nodes: Vec<String> },

    /// Two jobs share a label.
    #[error("Duplicate jobs with label {label}")]
    DuplicateLabel { label: String },

    /// A dependency names a label that does not exist.
    #[error("Job {label} depends on unknown label {dependency}")]
    UnknownDependency { label: String, dependency: String },

    /// A traversal found a cycle among the listed nodes.
    #[error("Cycle detected among nodes: {}", .nodes.join(", "))]
    GraphCycle { nodes: Vec<String> },

    /// The job registry and the graph nodes disagree.
    #[error("Job graph invariant violated after {phase}: {message}")]
    InvariantViolation { phase: String, message: String },

    /// A kept job depends on a removed job.
    #[error("Optimization error: {}", .violations.join(", "))]
    OptimizationConsistency { violations: Vec<String> },

    /// A reference placeholder in a payload could not be resolved.
    #[error("Reference resolution failed for job {label}: {message}")]
    ReferenceResolution { label: String, message: String },

    /// An optimization strategy or its backend failed.
    #[error("Strategy {strategy} failed for {label} during {phase}: {source}")]
    Strategy {
        label: String,
        phase: String,
        strategy: String,
        #[source]
        source: anyhow::Error,
    },

    /// Loading a kind failed.
    #[error("Error loading jobs for kind {kind}: {source}")]
    KindLoad {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// A target-selection filter failed.
    #[error("Target filter {filter} failed: {source}")]
    Filter {
        filter: String,
        #[source]
        source: anyhow::Error,
    },

    /// A morph failed.
    #[error("Morph {morph} failed: {source}")]
    Morph {
        morph: String,
        #[source]
        source: anyhow::Error,
    },

    /// A verification hook rejected a phase's graph.
    #[error("Verification {verification} failed after {phase}: {source}")]
    Verification {
        verification: String,
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading parameters or configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskgraphError {
    /// Shorthand for a configuration error.
    pub fn config(context: impl Into<String>, message: impl Into<String>) -> Self {
        TaskgraphError::Config {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a reference resolution error.
    pub fn reference(label: impl Into<String>, message: impl Into<String>) -> Self {
        TaskgraphError::ReferenceResolution {
            label: label.into(),
            message: message.into(),
        }
    }

    /// Returns the job label this error is attached to, if any.
    pub fn label(&self) -> Option<&str> {
        match self {
            TaskgraphError::DuplicateLabel { label }
            | TaskgraphError::UnknownDependency { label, .. }
            | TaskgraphError::ReferenceResolution { label, .. }
            | TaskgraphError::Strategy { label, .. } => Some(label),
            _ => None,
        }
    }
}

/// Convenience Result type for task-graph operations.
pub type Result<T> = std::result::Result<T, TaskgraphError>;

impl From<serde_json::Error> for TaskgraphError {
    fn from(err: serde_json::Error) -> Self {
        TaskgraphError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TaskgraphError {
    fn from(err: serde_yaml::Error) -> Self {
        TaskgraphError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_error_lists_all_violations() {
        let err = TaskgraphError::OptimizationConsistency {
            violations: vec![
                "test depends on build as build but it has been removed".to_string(),
                "lint depends on build as build but it has been removed".to_string(),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("test depends on build"));
        assert!(message.contains("lint depends on build"));
    }

    #[test]
    fn test_error_label() {
        let err = TaskgraphError::reference("docs", "no dependency named 'build'");
        assert_eq!(err.label(), Some("docs"));
        assert_eq!(TaskgraphError::config("kind", "bad").label(), None);
    }
}
