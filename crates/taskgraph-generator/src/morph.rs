//! Post-optimization graph rewrites.

use taskgraph_core::{GraphConfig, JobGraph, LabelToId, Parameters};

/// Rewrites the optimized graph for backend-specific constraints.
///
/// A morph may add or drop jobs but must return a graph whose registry and
/// nodes agree; the generator checks this after every morph.
pub trait Morph: Send + Sync {
    /// Rewrite `graph` and `label_to_id`, returning both.
    fn morph(
        &self,
        graph: JobGraph,
        label_to_id: LabelToId,
        params: &Parameters,
        graph_config: &GraphConfig,
    ) -> anyhow::Result<(JobGraph, LabelToId)>;
}

impl<F> Morph for F
where
    F: Fn(JobGraph, LabelToId, &Parameters, &GraphConfig) -> anyhow::Result<(JobGraph, LabelToId)>
        + Send
        + Sync,
{
    fn morph(
        &self,
        graph: JobGraph,
        label_to_id: LabelToId,
        params: &Parameters,
        graph_config: &GraphConfig,
    ) -> anyhow::Result<(JobGraph, LabelToId)> {
        self(graph, label_to_id, params, graph_config)
    }
}
