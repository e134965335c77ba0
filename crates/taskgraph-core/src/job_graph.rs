//! Job registry paired with its dependency graph.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::error::{Result, TaskgraphError};
use crate::graph::Graph;
use crate::job::{Job, JobId};

/// A set of jobs and the graph connecting them.
///
/// Invariant: the registry's keys are exactly the graph's nodes. Keys are
/// labels before optimization and job ids afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct JobGraph {
    jobs: BTreeMap<String, Job>,
    graph: Graph,
}

impl JobGraph {
    /// Pair a registry with a graph, checking the invariant.
    pub fn new(jobs: BTreeMap<String, Job>, graph: Graph) -> Result<Self> {
        let job_graph = Self { jobs, graph };
        job_graph.verify_invariant("construction")?;
        Ok(job_graph)
    }

    /// An edgeless job graph over the given jobs, keyed by label.
    pub fn from_jobs(jobs: impl IntoIterator<Item = Job>) -> Result<Self> {
        let mut registry = BTreeMap::new();
        for job in jobs {
            if registry.contains_key(&job.label) {
                return Err(TaskgraphError::DuplicateLabel { label: job.label });
            }
            registry.insert(job.label.clone(), job);
        }
        let graph = Graph::from_nodes(registry.keys().cloned());
        Ok(Self {
            jobs: registry,
            graph,
        })
    }

    /// A job graph with one edge per named dependency.
    ///
    /// Fails if two jobs share a label or if a dependency or soft dependency
    /// names a label that is not among `jobs`.
    pub fn from_linked_jobs(jobs: impl IntoIterator<Item = Job>) -> Result<Self> {
        let Self { jobs, .. } = Self::from_jobs(jobs)?;

        let mut edges = BTreeSet::new();
        for (label, job) in &jobs {
            for (name, dependency) in &job.dependencies {
                if !jobs.contains_key(dependency) {
                    return Err(TaskgraphError::UnknownDependency {
                        label: label.clone(),
                        dependency: dependency.clone(),
                    });
                }
                edges.insert((label.clone(), dependency.clone(), name.clone()));
            }
            if let Some(missing) = job.soft_dependencies.iter().find(|l| !jobs.contains_key(*l)) {
                return Err(TaskgraphError::UnknownDependency {
                    label: label.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let graph = Graph::new(jobs.keys().cloned().collect(), edges);
        Ok(Self { jobs, graph })
    }

    /// Check that the registry keys equal the graph nodes.
    pub fn verify_invariant(&self, phase: &str) -> Result<()> {
        let keys: BTreeSet<&String> = self.jobs.keys().collect();
        let nodes: BTreeSet<&String> = self.graph.nodes().iter().collect();
        if keys == nodes {
            return Ok(());
        }

        let missing_jobs: Vec<&str> = nodes.difference(&keys).map(|s| s.as_str()).collect();
        let missing_nodes: Vec<&str> = keys.difference(&nodes).map(|s| s.as_str()).collect();
        Err(TaskgraphError::InvariantViolation {
            phase: phase.to_string(),
            message: format!(
                "nodes without jobs: [{}]; jobs without nodes: [{}]",
                missing_jobs.join(", "),
                missing_nodes.join(", ")
            ),
        })
    }

    /// The job registry.
    pub fn jobs(&self) -> &BTreeMap<String, Job> {
        &self.jobs
    }

    /// The dependency graph.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Look up a job by key.
    pub fn get(&self, key: &str) -> Option<&Job> {
        self.jobs.get(key)
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the graph has no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Iterate over jobs in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Split into registry and graph.
    pub fn into_parts(self) -> (BTreeMap<String, Job>, Graph) {
        (self.jobs, self.graph)
    }

    /// The jobs under `keys` and the edges between them.
    pub fn subgraph(&self, keys: &BTreeSet<String>) -> Result<JobGraph> {
        self.check_known(keys)?;
        let edges = self
            .graph
            .edges()
            .iter()
            .filter(|(left, right, _)| keys.contains(left) && keys.contains(right))
            .cloned()
            .collect();
        Ok(self.with_graph(Graph::new(keys.clone(), edges)))
    }

    /// The jobs under `keys` together with everything they depend on.
    pub fn transitive_closure(&self, keys: &BTreeSet<String>) -> Result<JobGraph> {
        let graph = self.graph.transitive_closure(keys, false)?;
        Ok(self.with_graph(graph))
    }

    fn check_known(&self, keys: &BTreeSet<String>) -> Result<()> {
        let unknown: Vec<String> = keys
            .iter()
            .filter(|k| !self.jobs.contains_key(*k))
            .cloned()
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(TaskgraphError::UnknownNode { nodes: unknown })
        }
    }

    /// Pair `graph` (whose nodes are a subset of ours) with the matching jobs.
    fn with_graph(&self, graph: Graph) -> JobGraph {
        let jobs = graph
            .nodes()
            .iter()
            .filter_map(|key| self.jobs.get(key).map(|job| (key.clone(), job.clone())))
            .collect();
        JobGraph { jobs, graph }
    }

    /// Call `f` once per job, dependencies first.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Job, &Graph) -> Result<()>,
    {
        for key in self.graph.visit_postorder() {
            let key = key?;
            if let Some(job) = self.jobs.get(key) {
                f(job, &self.graph)?;
            }
        }
        Ok(())
    }

    /// Persisted form: a map of key to job record.
    ///
    /// Each record's `dependencies` is recomputed from the graph edges; the
    /// value stored on the job is ignored.
    pub fn to_json(&self) -> Result<Value> {
        let named_links = self.graph.named_links_dict();
        let mut records = serde_json::Map::new();
        for (key, job) in &self.jobs {
            let mut job = job.clone();
            job.dependencies = named_links.get(key).cloned().unwrap_or_default();
            records.insert(key.clone(), serde_json::to_value(&job)?);
        }
        Ok(Value::Object(records))
    }

    /// Rebuild a job graph from its persisted form.
    pub fn from_json(value: &Value) -> Result<Self> {
        let records = value.as_object().ok_or_else(|| {
            TaskgraphError::Serialization("job graph must be a JSON object".to_string())
        })?;

        let mut jobs = BTreeMap::new();
        let mut edges = BTreeSet::new();
        for (key, record) in records {
            let job: Job = serde_json::from_value(record.clone())?;
            for (name, dependency) in &job.dependencies {
                edges.insert((key.clone(), dependency.clone(), name.clone()));
            }
            jobs.insert(key.clone(), job);
        }

        let graph = Graph::new(jobs.keys().cloned().collect(), edges);
        Self::new(jobs, graph)
    }

    /// Persisted form as a JSON string.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }

    /// Rebuild a job graph from a JSON string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }
}

/// Mapping from labels to the job ids they resolved to.
pub type LabelToId = BTreeMap<String, JobId>;
