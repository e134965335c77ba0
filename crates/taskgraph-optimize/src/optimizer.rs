//! The optimizer: removes and replaces jobs, then finalizes the survivors.
//!
//! Optimization runs in three phases over a target [`JobGraph`] keyed by
//! label:
//!
//! 1. **Removal**, dependents first: a job may be removed only once every job
//!    depending on it has been removed.
//! 2. **Replacement**, dependencies first: a job may be replaced by an
//!    existing job only once all of its dependencies were removed or
//!    replaced.
//! 3. **Finalization**: surviving jobs get ids, their payload references are
//!    resolved, and the graph is re-keyed by [`JobId`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use taskgraph_core::{
    Graph, GraphConfig, Job, JobGraph, JobId, Label, LabelToId, Parameters, Result, TaskgraphError,
};
use tracing::{debug, info, warn};

use crate::resolver::{resolve_references, ReferenceContext};
use crate::strategy::{OptimizationStrategy, Replacement, StrategyRegistry};

const REMOVAL: &str = "removal";
const REPLACEMENT: &str = "replacement";

/// Optimizes target job graphs.
#[derive(Debug, Clone)]
pub struct Optimizer {
    /// Strategies available to job optimization directives.
    strategies: StrategyRegistry,

    /// Used to resolve artifact references.
    graph_config: GraphConfig,

    /// Labels already submitted by an earlier run, bound without a strategy call.
    existing_jobs: LabelToId,

    /// Labels explicitly requested; anything else only exists to serve them.
    requested: Option<BTreeSet<Label>>,

    /// Reference point for relative datestamps.
    now: DateTime<Utc>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(StrategyRegistry::new())
    }
}

/// Per-reason decision counts, for the phase summaries.
#[derive(Debug, Default)]
struct Tally(BTreeMap<String, usize>);

impl Tally {
    fn record(&mut self, label: &str, verdict: &str, reason: &str) {
        debug!("{label}: {verdict} ({reason})");
        *self.0.entry(reason.to_string()).or_default() += 1;
    }

    fn total(&self) -> usize {
        self.0.values().sum()
    }

    fn summary(&self) -> String {
        self.0
            .iter()
            .map(|(reason, count)| format!("{count} {reason}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Optimizer {
    /// Create an optimizer using `strategies`.
    pub fn new(strategies: StrategyRegistry) -> Self {
        Self {
            strategies,
            graph_config: GraphConfig::default(),
            existing_jobs: LabelToId::new(),
            requested: None,
            now: Utc::now(),
        }
    }

    /// Set the graph configuration.
    pub fn with_graph_config(mut self, graph_config: GraphConfig) -> Self {
        self.graph_config = graph_config;
        self
    }

    /// Bind these labels to already-existing jobs.
    pub fn with_existing_jobs(mut self, existing_jobs: LabelToId) -> Self {
        self.existing_jobs = existing_jobs;
        self
    }

    /// Restrict the labels that must run for their own sake.
    ///
    /// A label outside this set is removed as soon as everything depending
    /// on it was removed. Without a requested set, every label is requested.
    pub fn with_requested(mut self, requested: BTreeSet<Label>) -> Self {
        self.requested = Some(requested);
        self
    }

    /// Fix the time relative datestamps are computed from.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// The strategy registry.
    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// Optimize `target`, returning the finalized graph keyed by job id and
    /// the id every surviving or replaced label resolved to.
    pub async fn optimize(
        &self,
        target: &JobGraph,
        params: &Parameters,
        do_not_optimize: &BTreeSet<Label>,
        decision_job_id: &JobId,
    ) -> Result<(JobGraph, LabelToId)> {
        let mut removed = self.remove_jobs(target, params, do_not_optimize).await?;
        let mut label_to_id = LabelToId::new();
        let replaced = self
            .replace_jobs(target, params, do_not_optimize, &mut removed, &mut label_to_id)
            .await?;
        let optimized = self.finalize(target, &removed, &replaced, &mut label_to_id, decision_job_id)?;
        Ok((optimized, label_to_id))
    }

    fn is_requested(&self, label: &str) -> bool {
        self.requested.as_ref().map_or(true, |r| r.contains(label))
    }

    fn strategy_for<'a>(
        &'a self,
        job: &'a Job,
        phase: &str,
    ) -> Result<(&'a str, &'a OptimizationStrategy, &'a Value)> {
        self.strategies.for_job(job).map_err(|source| TaskgraphError::Strategy {
            label: job.label.clone(),
            phase: phase.to_string(),
            strategy: job
                .optimization
                .as_ref()
                .map_or_else(|| "never".to_string(), |o| o.strategy.clone()),
            source,
        })
    }

    /// Phase A: decide which labels can be removed.
    pub async fn remove_jobs(
        &self,
        target: &JobGraph,
        params: &Parameters,
        do_not_optimize: &BTreeSet<Label>,
    ) -> Result<BTreeSet<Label>> {
        let graph = target.graph();
        let dependents_of = graph.reverse_links_dict();
        let mut removed: BTreeSet<Label> = BTreeSet::new();
        let mut prune_candidates: BTreeSet<Label> = BTreeSet::new();
        let mut tally = Tally::default();
        let no_dependents = BTreeSet::new();

        for label in graph.visit_preorder() {
            let label = label?;
            let job = lookup(target, label, REMOVAL)?;
            let dependents = dependents_of.get(label).unwrap_or(&no_dependents);

            // Dependents that do not by themselves force this job to run.
            let prune_deps: BTreeSet<Label> = dependents
                .iter()
                .filter(|d| prune_candidates.contains(*d))
                .filter(|d| {
                    target
                        .get(d)
                        .map_or(false, |j| j.if_dependencies.is_empty() || gates_on(j, label))
                })
                .cloned()
                .collect();

            if do_not_optimize.contains(label) {
                release(prune_deps, &mut prune_candidates, target, &dependents_of);
                debug!("{label}: kept (do not optimize)");
                continue;
            }

            if dependents
                .iter()
                .any(|d| !removed.contains(d) && !prune_deps.contains(d))
            {
                release(prune_deps, &mut prune_candidates, target, &dependents_of);
                debug!("{label}: kept (dependent jobs)");
                continue;
            }

            let reason = if !self.is_requested(label) {
                "dependents optimized"
            } else {
                let (name, strategy, arg) = self.strategy_for(job, REMOVAL)?;
                let remove = strategy
                    .should_remove(job, params, arg)
                    .await
                    .map_err(|source| TaskgraphError::Strategy {
                        label: label.clone(),
                        phase: REMOVAL.to_string(),
                        strategy: name.to_string(),
                        source,
                    })?;
                if remove {
                    name
                } else if !job.if_dependencies.is_empty() {
                    // Decided once its if-dependencies have been visited.
                    prune_candidates.insert(label.clone());
                    debug!("{label}: kept by {name}, pending if-dependencies");
                    continue;
                } else {
                    release(prune_deps, &mut prune_candidates, target, &dependents_of);
                    debug!("{label}: kept ({name})");
                    continue;
                }
            };

            if prune_deps.is_empty() {
                removed.insert(label.clone());
                tally.record(label, "removed", reason);
            } else {
                // Removed only if the dependents it serves are pruned.
                prune_candidates.insert(label.clone());
            }
        }

        for label in &prune_candidates {
            let has_live_dependents = dependents_of.get(label).map_or(false, |ds| {
                ds.iter()
                    .any(|d| !prune_candidates.contains(d) && !removed.contains(d))
            });
            if has_live_dependents {
                debug!("{label}: kept (dependent jobs)");
                continue;
            }
            removed.insert(label.clone());
            tally.record(label, "removed", "if-dependencies pruning");
        }

        info!(
            "Removed {} of {} jobs during optimization ({})",
            tally.total(),
            target.len(),
            tally.summary()
        );
        Ok(removed)
    }

    /// Phase B: bind labels to existing jobs.
    ///
    /// Labels a strategy decides to drop without replacement are added to
    /// `removed`; bound labels are recorded in `label_to_id` and returned.
    pub async fn replace_jobs(
        &self,
        target: &JobGraph,
        params: &Parameters,
        do_not_optimize: &BTreeSet<Label>,
        removed: &mut BTreeSet<Label>,
        label_to_id: &mut LabelToId,
    ) -> Result<BTreeSet<Label>> {
        let graph = target.graph();
        let dependencies_of = graph.links_dict();
        let mut replaced: BTreeSet<Label> = BTreeSet::new();
        let mut tally = Tally::default();

        for label in graph.visit_postorder() {
            let label = label?;
            if removed.contains(label) || do_not_optimize.contains(label) {
                continue;
            }

            let blocked = dependencies_of.get(label).map_or(false, |deps| {
                deps.iter()
                    .any(|d| !replaced.contains(d) && !removed.contains(d))
            });
            if blocked {
                continue;
            }

            if let Some(job_id) = self.existing_jobs.get(label) {
                label_to_id.insert(label.clone(), job_id.clone());
                replaced.insert(label.clone());
                tally.record(label, "replaced", "existing jobs");
                continue;
            }

            let job = lookup(target, label, REPLACEMENT)?;
            let (name, strategy, arg) = self.strategy_for(job, REPLACEMENT)?;
            let replacement = strategy
                .should_replace(job, params, arg)
                .await
                .map_err(|source| TaskgraphError::Strategy {
                    label: label.clone(),
                    phase: REPLACEMENT.to_string(),
                    strategy: name.to_string(),
                    source,
                })?;
            match replacement {
                Replacement::Keep => {}
                Replacement::Remove => {
                    removed.insert(label.clone());
                    tally.record(label, "removed", name);
                }
                Replacement::Replace(job_id) => {
                    label_to_id.insert(label.clone(), job_id);
                    replaced.insert(label.clone());
                    tally.record(label, "replaced", name);
                }
            }
        }

        info!(
            "Replaced {} jobs during optimization ({})",
            tally.total(),
            tally.summary()
        );
        Ok(replaced)
    }

    /// Phase C: build the optimized graph from the phase A and B decisions.
    ///
    /// Every label that is neither removed nor bound in `label_to_id` gets a
    /// fresh id. Fails with [`TaskgraphError::OptimizationConsistency`] if a
    /// job that still runs depends on a removed one.
    pub fn finalize(
        &self,
        target: &JobGraph,
        removed: &BTreeSet<Label>,
        replaced: &BTreeSet<Label>,
        label_to_id: &mut LabelToId,
        decision_job_id: &JobId,
    ) -> Result<JobGraph> {
        let graph = target.graph();
        let runs = |label: &Label| !removed.contains(label) && !replaced.contains(label);

        let violations: Vec<String> = graph
            .edges()
            .iter()
            .filter(|(left, right, _)| runs(left) && removed.contains(right))
            .map(|(left, right, name)| {
                format!("{left} depends on {right} as {name} but it has been removed")
            })
            .collect();
        if !violations.is_empty() {
            return Err(TaskgraphError::OptimizationConsistency { violations });
        }

        if let Some(unbound) = replaced.iter().find(|l| !label_to_id.contains_key(*l)) {
            return Err(TaskgraphError::InvariantViolation {
                phase: "finalization".to_string(),
                message: format!("replaced job {unbound} has no id"),
            });
        }

        for label in graph.nodes() {
            if !removed.contains(label) && !label_to_id.contains_key(label) {
                label_to_id.insert(label.clone(), JobId::generate());
            }
        }

        let named_links = graph.named_links_dict();
        let mut jobs: BTreeMap<String, Job> = BTreeMap::new();
        for (label, job) in target.jobs() {
            if !runs(label) {
                continue;
            }
            let job_id = bound_id(label_to_id, label)?.clone();

            let mut named: BTreeMap<String, JobId> = BTreeMap::new();
            if let Some(links) = named_links.get(label) {
                for (name, dependency) in links {
                    named.insert(name.clone(), bound_id(label_to_id, dependency)?.clone());
                }
            }
            let mut resolvable = named.clone();
            for soft in &job.soft_dependencies {
                match label_to_id.get(soft) {
                    Some(id) if !removed.contains(soft) => {
                        resolvable.insert(soft.clone(), id.clone());
                    }
                    _ => warn!("{label}: dropping soft dependency {soft}"),
                }
            }

            let mut job = job.clone();
            let ctx = ReferenceContext {
                label,
                job_id: &job_id,
                decision_job_id,
                dependencies: &resolvable,
                graph_config: &self.graph_config,
                now: self.now,
            };
            resolve_references(&mut job.payload, &ctx)?;

            let mut ids: Vec<&JobId> = resolvable.values().collect();
            ids.sort();
            ids.dedup();
            rebind_listed_dependencies(&mut job.payload, graph.nodes(), removed, label_to_id);
            append_dependencies(&mut job.payload, label, &ids)?;

            job.dependencies = named
                .into_iter()
                .map(|(name, id)| (name, id.into_string()))
                .collect();
            job.job_id = Some(job_id.clone());
            jobs.insert(job_id.into_string(), job);
        }

        let edges = graph
            .edges()
            .iter()
            .filter_map(|(left, right, name)| {
                let left = label_to_id.get(left)?.as_str();
                let right = label_to_id.get(right)?.as_str();
                (jobs.contains_key(left) && jobs.contains_key(right))
                    .then(|| (left.to_string(), right.to_string(), name.clone()))
            })
            .collect();

        info!("Optimized graph has {} jobs", jobs.len());
        let nodes = jobs.keys().cloned().collect();
        JobGraph::new(jobs, Graph::new(nodes, edges))
    }
}

/// Whether `job` names `label` as one of its if-dependencies.
fn gates_on(job: &Job, label: &str) -> bool {
    job.if_dependencies
        .iter()
        .any(|name| job.dependencies.get(name).map(String::as_str) == Some(label))
}

/// A job was kept: the prune candidates it gates are kept with it.
fn release(
    prune_deps: BTreeSet<Label>,
    prune_candidates: &mut BTreeSet<Label>,
    target: &JobGraph,
    dependents_of: &BTreeMap<Label, BTreeSet<Label>>,
) {
    let mut queue: Vec<Label> = prune_deps.into_iter().collect();
    while let Some(label) = queue.pop() {
        if !prune_candidates.contains(&label) {
            continue;
        }
        // Candidates without if-dependencies of their own stay candidates.
        if target.get(&label).map_or(true, |j| j.if_dependencies.is_empty()) {
            continue;
        }
        prune_candidates.remove(&label);
        if let Some(dependents) = dependents_of.get(&label) {
            queue.extend(
                dependents
                    .iter()
                    .filter(|d| prune_candidates.contains(*d))
                    .cloned(),
            );
        }
    }
}

fn lookup<'a>(target: &'a JobGraph, label: &str, phase: &str) -> Result<&'a Job> {
    target.get(label).ok_or_else(|| TaskgraphError::InvariantViolation {
        phase: phase.to_string(),
        message: format!("graph node {label} has no job"),
    })
}

fn bound_id<'a>(label_to_id: &'a LabelToId, label: &str) -> Result<&'a JobId> {
    label_to_id.get(label).ok_or_else(|| TaskgraphError::InvariantViolation {
        phase: "finalization".to_string(),
        message: format!("{label} has no id"),
    })
}

/// Rewrite payload `dependencies` entries naming a node of the input graph.
///
/// Entries for removed nodes are dropped and the others take the node's new
/// id. Entries naming anything else are left alone.
fn rebind_listed_dependencies(
    payload: &mut Value,
    nodes: &BTreeSet<String>,
    removed: &BTreeSet<Label>,
    label_to_id: &LabelToId,
) {
    let Some(Value::Array(listed)) = payload.get_mut("dependencies") else {
        return;
    };
    listed.retain(|entry| entry.as_str().map_or(true, |node| !removed.contains(node)));
    for entry in listed.iter_mut() {
        let rebound = entry
            .as_str()
            .filter(|node| nodes.contains(*node))
            .and_then(|node| label_to_id.get(node));
        if let Some(id) = rebound {
            *entry = Value::String(id.to_string());
        }
    }
}

/// Append `ids` to the payload's `dependencies` list, skipping ids already listed.
fn append_dependencies(payload: &mut Value, label: &str, ids: &[&JobId]) -> Result<()> {
    if payload.is_null() {
        *payload = Value::Object(serde_json::Map::new());
    }
    let Value::Object(map) = payload else {
        return Err(TaskgraphError::config(
            format!("job {label}"),
            "payload must be a map to record dependencies",
        ));
    };
    let entry = map
        .entry("dependencies")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(listed) = entry else {
        return Err(TaskgraphError::config(
            format!("job {label}"),
            "payload dependencies must be a list",
        ));
    };
    for id in ids {
        let id = Value::String(id.to_string());
        if listed.contains(&id) {
            debug!("{label}: dependency {id} already listed in payload");
            continue;
        }
        listed.push(id);
    }
    Ok(())
}

/// Optimize `target` with an optional strategy registry and existing jobs.
///
/// Without a registry only `never` and `always` are available.
pub async fn optimize_job_graph(
    target: &JobGraph,
    params: &Parameters,
    do_not_optimize: &BTreeSet<Label>,
    decision_job_id: &JobId,
    existing_jobs: Option<&LabelToId>,
    strategies: Option<&StrategyRegistry>,
) -> Result<(JobGraph, LabelToId)> {
    let mut optimizer = Optimizer::new(strategies.cloned().unwrap_or_default());
    if let Some(existing) = existing_jobs {
        optimizer = optimizer.with_existing_jobs(existing.clone());
    }
    optimizer
        .optimize(target, params, do_not_optimize, decision_job_id)
        .await
}
