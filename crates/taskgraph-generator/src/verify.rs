//! Verifications run on each completed phase.

use std::fmt;

use serde_json::Value;
use taskgraph_core::{GraphConfig, JobGraph, Parameters};

/// A generation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    FullJobSet,
    FullJobGraph,
    TargetJobSet,
    TargetJobGraph,
    OptimizedJobGraph,
    MorphedJobGraph,
}

impl Phase {
    /// Snake-case name, used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::FullJobSet => "full_job_set",
            Phase::FullJobGraph => "full_job_graph",
            Phase::TargetJobSet => "target_job_set",
            Phase::TargetJobGraph => "target_job_graph",
            Phase::OptimizedJobGraph => "optimized_job_graph",
            Phase::MorphedJobGraph => "morphed_job_graph",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A check on the output of a phase. Returning an error aborts the run.
pub trait Verification: Send + Sync {
    /// Check `graph`, the output of `phase`.
    fn verify(
        &self,
        phase: Phase,
        graph: &JobGraph,
        params: &Parameters,
        graph_config: &GraphConfig,
    ) -> anyhow::Result<()>;
}

impl<F> Verification for F
where
    F: Fn(Phase, &JobGraph, &Parameters, &GraphConfig) -> anyhow::Result<()> + Send + Sync,
{
    fn verify(
        &self,
        phase: Phase,
        graph: &JobGraph,
        params: &Parameters,
        graph_config: &GraphConfig,
    ) -> anyhow::Result<()> {
        self(phase, graph, params, graph_config)
    }
}

/// Limits how many dependencies an optimized job may list in its payload.
#[derive(Debug, Clone, Copy)]
pub struct MaxDependencies(pub usize);

impl Default for MaxDependencies {
    fn default() -> Self {
        Self(10_000)
    }
}

impl Verification for MaxDependencies {
    fn verify(
        &self,
        phase: Phase,
        graph: &JobGraph,
        _params: &Parameters,
        _graph_config: &GraphConfig,
    ) -> anyhow::Result<()> {
        if phase != Phase::OptimizedJobGraph && phase != Phase::MorphedJobGraph {
            return Ok(());
        }
        for job in graph.iter() {
            let count = job
                .payload
                .get("dependencies")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            if count > self.0 {
                anyhow::bail!(
                    "job {} has {} dependencies, more than the limit of {}",
                    job.label,
                    count,
                    self.0
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgraph_core::Job;

    #[test]
    fn test_max_dependencies() {
        let graph = JobGraph::from_jobs([Job::new("test", "test").with_payload(json!({"dependencies": ["a", "b", "c"]}))])
            .unwrap();
        let params = Parameters::default();
        let config = GraphConfig::default();

        assert!(MaxDependencies(3)
            .verify(Phase::OptimizedJobGraph, &graph, &params, &config)
            .is_ok());
        assert!(MaxDependencies(2)
            .verify(Phase::OptimizedJobGraph, &graph, &params, &config)
            .is_err());
        // Only graphs with resolved payloads are checked.
        assert!(MaxDependencies(2)
            .verify(Phase::FullJobGraph, &graph, &params, &config)
            .is_ok());
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::TargetJobGraph.to_string(), "target_job_graph");
    }
}
