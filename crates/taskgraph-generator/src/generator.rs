//! The generation pipeline.
//!
//! A [`Generator`] computes, on demand, each phase of a run:
//!
//! parameters → full job set → full job graph → target job set → target job
//! graph → optimized job graph → morphed job graph
//!
//! Each phase is computed at most once, from the phase before it, and is only
//! cached after it completed (including its verifications).

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use taskgraph_core::{GraphConfig, Job, JobGraph, JobId, Label, LabelToId, Parameters, Result, TaskgraphError};
use taskgraph_optimize::{Optimizer, StrategyRegistry};
use tracing::{info, warn};

use crate::filter::{KindFilter, StandardFilter, TargetFilter};
use crate::kind::{load_order, Kind};
use crate::morph::Morph;
use crate::verify::{Phase, Verification};

/// Id standing in for the decision job when none is configured.
pub const DEFAULT_DECISION_JOB_ID: &str = "DECISION-JOB";

/// The target graph together with the labels that were asked for.
#[derive(Debug, Clone)]
struct Target {
    graph: JobGraph,
    requested: BTreeSet<Label>,
}

/// Lazily computes the phases of a generation run.
pub struct Generator {
    parameters: Parameters,
    graph_config: GraphConfig,
    kinds: Vec<Kind>,
    target_tasks_methods: Vec<(String, Arc<dyn TargetFilter>)>,
    filters: Vec<(String, Arc<dyn TargetFilter>)>,
    morphs: Vec<(String, Arc<dyn Morph>)>,
    verifications: Vec<(String, Arc<dyn Verification>)>,
    strategies: StrategyRegistry,
    decision_job_id: JobId,

    full_job_set: Option<JobGraph>,
    full_job_graph: Option<JobGraph>,
    target_job_set: Option<JobGraph>,
    target_job_graph: Option<Target>,
    optimized_job_graph: Option<(JobGraph, LabelToId)>,
    morphed_job_graph: Option<(JobGraph, LabelToId)>,
}

fn cached<T>(slot: &Option<T>, phase: Phase) -> Result<&T> {
    slot.as_ref().ok_or_else(|| TaskgraphError::InvariantViolation {
        phase: phase.to_string(),
        message: "phase was not computed".to_string(),
    })
}

fn lookup_filter<'a>(
    registered: &'a [(String, Arc<dyn TargetFilter>)],
    wanted: &str,
    what: &str,
) -> Result<(&'a str, &'a dyn TargetFilter)> {
    registered
        .iter()
        .find(|(name, _)| name == wanted)
        .map(|(name, filter)| (name.as_str(), filter.as_ref()))
        .ok_or_else(|| TaskgraphError::config("parameters", format!("unknown {what} {wanted}")))
}

impl Generator {
    /// Create a generator for `kinds`.
    ///
    /// The `default` target tasks method and the `target-kinds` filter are
    /// registered by default.
    pub fn new(parameters: Parameters, graph_config: GraphConfig, kinds: Vec<Kind>) -> Self {
        Self {
            parameters,
            graph_config,
            kinds,
            target_tasks_methods: Vec::new(),
            filters: Vec::new(),
            morphs: Vec::new(),
            verifications: Vec::new(),
            strategies: StrategyRegistry::new(),
            decision_job_id: JobId::new(DEFAULT_DECISION_JOB_ID),
            full_job_set: None,
            full_job_graph: None,
            target_job_set: None,
            target_job_graph: None,
            optimized_job_graph: None,
            morphed_job_graph: None,
        }
        .with_target_tasks_method("default", StandardFilter)
        .with_filter("target-kinds", KindFilter)
    }

    /// Use `strategies` for optimization.
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Register a target tasks method under `name`.
    ///
    /// The method named by the `target_tasks_method` parameter makes the
    /// first selection; the filters narrow it further.
    pub fn with_target_tasks_method<F: TargetFilter + 'static>(mut self, name: impl Into<String>, method: F) -> Self {
        let name = name.into();
        self.target_tasks_methods.retain(|(existing, _)| *existing != name);
        self.target_tasks_methods.push((name, Arc::new(method)));
        self
    }

    /// Register a target filter under `name`.
    ///
    /// Filters run in registration order unless the `filters` parameter
    /// names the ones to run.
    pub fn with_filter<F: TargetFilter + 'static>(mut self, name: impl Into<String>, filter: F) -> Self {
        let name = name.into();
        self.filters.retain(|(existing, _)| *existing != name);
        self.filters.push((name, Arc::new(filter)));
        self
    }

    /// Append a morph.
    pub fn with_morph<M: Morph + 'static>(mut self, name: impl Into<String>, morph: M) -> Self {
        self.morphs.push((name.into(), Arc::new(morph)));
        self
    }

    /// Append a verification, run on every phase.
    pub fn with_verification<V: Verification + 'static>(mut self, name: impl Into<String>, verification: V) -> Self {
        self.verifications.push((name.into(), Arc::new(verification)));
        self
    }

    /// Set the id of the decision job.
    pub fn with_decision_job_id(mut self, decision_job_id: JobId) -> Self {
        self.decision_job_id = decision_job_id;
        self
    }

    /// Parameters of the run.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// Project configuration.
    pub fn graph_config(&self) -> &GraphConfig {
        &self.graph_config
    }

    /// Id substituted for `<decision>` references.
    pub fn decision_job_id(&self) -> &JobId {
        &self.decision_job_id
    }

    /// Every job of every loaded kind, without edges.
    pub async fn full_job_set(&mut self) -> Result<&JobGraph> {
        self.ensure_full_job_set().await?;
        cached(&self.full_job_set, Phase::FullJobSet)
    }

    /// Every job, with an edge per named dependency.
    pub async fn full_job_graph(&mut self) -> Result<&JobGraph> {
        self.ensure_full_job_graph().await?;
        cached(&self.full_job_graph, Phase::FullJobGraph)
    }

    /// The jobs selected by the filters and the edges between them.
    pub async fn target_job_set(&mut self) -> Result<&JobGraph> {
        self.ensure_target_job_set().await?;
        cached(&self.target_job_set, Phase::TargetJobSet)
    }

    /// The selected jobs and everything they depend on.
    pub async fn target_job_graph(&mut self) -> Result<&JobGraph> {
        self.ensure_target_job_graph().await?;
        Ok(&cached(&self.target_job_graph, Phase::TargetJobGraph)?.graph)
    }

    /// The optimized graph, keyed by job id.
    pub async fn optimized_job_graph(&mut self) -> Result<&JobGraph> {
        self.ensure_optimized_job_graph().await?;
        Ok(&cached(&self.optimized_job_graph, Phase::OptimizedJobGraph)?.0)
    }

    /// Label to job id mapping produced by optimization.
    pub async fn label_to_id(&mut self) -> Result<&LabelToId> {
        self.ensure_optimized_job_graph().await?;
        Ok(&cached(&self.optimized_job_graph, Phase::OptimizedJobGraph)?.1)
    }

    /// The optimized graph after every morph.
    pub async fn morphed_job_graph(&mut self) -> Result<&JobGraph> {
        self.ensure_morphed_job_graph().await?;
        Ok(&cached(&self.morphed_job_graph, Phase::MorphedJobGraph)?.0)
    }

    /// Label to job id mapping after every morph.
    pub async fn morphed_label_to_id(&mut self) -> Result<&LabelToId> {
        self.ensure_morphed_job_graph().await?;
        Ok(&cached(&self.morphed_job_graph, Phase::MorphedJobGraph)?.1)
    }

    /// Run every phase, returning the final graph and label mapping.
    pub async fn generate(&mut self) -> Result<(JobGraph, LabelToId)> {
        self.ensure_morphed_job_graph().await?;
        cached(&self.morphed_job_graph, Phase::MorphedJobGraph).cloned()
    }

    fn verify(&self, phase: Phase, graph: &JobGraph) -> Result<()> {
        for (name, verification) in &self.verifications {
            verification
                .verify(phase, graph, &self.parameters, &self.graph_config)
                .map_err(|source| TaskgraphError::Verification {
                    verification: name.clone(),
                    phase: phase.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// The target tasks method followed by the filters to run, in order.
    fn active_filters(&self) -> Result<Vec<(&str, &dyn TargetFilter)>> {
        let method = &self.parameters.target_tasks_method;
        let mut active = vec![lookup_filter(&self.target_tasks_methods, method, "target tasks method")?];
        if self.parameters.filters.is_empty() {
            active.extend(
                self.filters
                    .iter()
                    .map(|(name, filter)| (name.as_str(), filter.as_ref())),
            );
            return Ok(active);
        }
        for wanted in &self.parameters.filters {
            active.push(lookup_filter(&self.filters, wanted, "target filter")?);
        }
        Ok(active)
    }

    async fn ensure_full_job_set(&mut self) -> Result<()> {
        if self.full_job_set.is_some() {
            return Ok(());
        }

        info!("Loading jobs");
        let order = load_order(&self.kinds, &self.parameters.target_kinds)?;
        let mut jobs: Vec<Job> = Vec::new();
        for kind in order {
            let loaded: Vec<Job> = jobs
                .iter()
                .filter(|job| kind.kind_dependencies().contains(&job.kind))
                .cloned()
                .collect();
            let kind_jobs = kind
                .load_jobs(&self.parameters, &self.graph_config, &loaded)
                .await?;
            info!("Generated {} jobs for kind {}", kind_jobs.len(), kind.name());
            jobs.extend(kind_jobs);
        }

        let full_set = JobGraph::from_jobs(jobs)?;
        self.verify(Phase::FullJobSet, &full_set)?;
        self.full_job_set = Some(full_set);
        Ok(())
    }

    async fn ensure_full_job_graph(&mut self) -> Result<()> {
        if self.full_job_graph.is_some() {
            return Ok(());
        }
        self.ensure_full_job_set().await?;

        let full_set = cached(&self.full_job_set, Phase::FullJobSet)?;
        let graph = JobGraph::from_linked_jobs(full_set.iter().cloned())?;
        info!(
            "Full job graph has {} jobs and {} dependencies",
            graph.len(),
            graph.graph().edges().len()
        );
        self.verify(Phase::FullJobGraph, &graph)?;
        self.full_job_graph = Some(graph);
        Ok(())
    }

    async fn ensure_target_job_set(&mut self) -> Result<()> {
        if self.target_job_set.is_some() {
            return Ok(());
        }
        self.ensure_full_job_graph().await?;

        let full = cached(&self.full_job_graph, Phase::FullJobGraph)?;
        let mut selected: BTreeSet<Label> = full.jobs().keys().cloned().collect();
        for (name, filter) in self.active_filters()? {
            let candidates = full.subgraph(&selected)?;
            let kept = filter
                .filter(&candidates, &self.parameters, &self.graph_config)
                .map_err(|source| TaskgraphError::Filter {
                    filter: name.to_string(),
                    source,
                })?;
            let before = selected.len();
            selected = kept.into_iter().filter(|l| selected.contains(l)).collect();
            info!(
                "Filter {} pruned {} jobs ({} remain)",
                name,
                before - selected.len(),
                selected.len()
            );
        }
        if selected.is_empty() {
            warn!("No target jobs selected");
        }

        let target_set = full.subgraph(&selected)?;
        self.verify(Phase::TargetJobSet, &target_set)?;
        self.target_job_set = Some(target_set);
        Ok(())
    }

    async fn ensure_target_job_graph(&mut self) -> Result<()> {
        if self.target_job_graph.is_some() {
            return Ok(());
        }
        self.ensure_target_job_set().await?;

        let full = cached(&self.full_job_graph, Phase::FullJobGraph)?;
        let target_set = cached(&self.target_job_set, Phase::TargetJobSet)?;
        let mut requested: BTreeSet<Label> = target_set.jobs().keys().cloned().collect();
        if self.parameters.enable_always_target {
            let always: BTreeSet<Label> = full
                .iter()
                .filter(|job| job.attribute("always_target").and_then(Value::as_bool).unwrap_or(false))
                .map(|job| job.label.clone())
                .collect();
            info!(
                "Adding {} jobs with the always_target attribute",
                always.difference(&requested).count()
            );
            requested.extend(always);
        }

        let graph = full.transitive_closure(&requested)?;
        info!("Target job graph has {} jobs", graph.len());
        self.verify(Phase::TargetJobGraph, &graph)?;
        self.target_job_graph = Some(Target { graph, requested });
        Ok(())
    }

    async fn ensure_optimized_job_graph(&mut self) -> Result<()> {
        if self.optimized_job_graph.is_some() {
            return Ok(());
        }
        self.ensure_target_job_graph().await?;

        let target = cached(&self.target_job_graph, Phase::TargetJobGraph)?;
        let target_set = cached(&self.target_job_set, Phase::TargetJobSet)?;
        let mut do_not_optimize: BTreeSet<Label> =
            self.parameters.do_not_optimize.iter().cloned().collect();
        if !self.parameters.optimize_target_tasks {
            do_not_optimize.extend(target_set.jobs().keys().cloned());
        }

        let optimizer = Optimizer::new(self.strategies.clone())
            .with_graph_config(self.graph_config.clone())
            .with_existing_jobs(self.parameters.existing_tasks.clone())
            .with_requested(target.requested.clone())
            .with_now(self.parameters.build_date);
        let (graph, label_to_id) = optimizer
            .optimize(&target.graph, &self.parameters, &do_not_optimize, &self.decision_job_id)
            .await?;

        self.verify(Phase::OptimizedJobGraph, &graph)?;
        self.optimized_job_graph = Some((graph, label_to_id));
        Ok(())
    }

    async fn ensure_morphed_job_graph(&mut self) -> Result<()> {
        if self.morphed_job_graph.is_some() {
            return Ok(());
        }
        self.ensure_optimized_job_graph().await?;

        let (mut graph, mut label_to_id) =
            cached(&self.optimized_job_graph, Phase::OptimizedJobGraph)?.clone();
        for (name, morph) in &self.morphs {
            let (morphed, mapping) = morph
                .morph(graph, label_to_id, &self.parameters, &self.graph_config)
                .map_err(|source| TaskgraphError::Morph {
                    morph: name.clone(),
                    source,
                })?;
            morphed.verify_invariant(&format!("morph {name}"))?;
            info!("Morph {} produced {} jobs", name, morphed.len());
            graph = morphed;
            label_to_id = mapping;
        }

        self.verify(Phase::MorphedJobGraph, &graph)?;
        self.morphed_job_graph = Some((graph, label_to_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::KindLoader;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits fixed documents and counts its calls.
    struct Documents {
        documents: Vec<Value>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl KindLoader for Documents {
        async fn load(
            &self,
            _kind: &Kind,
            _params: &Parameters,
            _graph_config: &GraphConfig,
            _loaded: &[Job],
        ) -> anyhow::Result<Vec<Value>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.documents.clone())
        }
    }

    fn kind(name: &str, documents: Vec<Value>) -> (Kind, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = Documents {
            documents,
            calls: calls.clone(),
        };
        (Kind::new(name, Arc::new(loader)), calls)
    }

    fn build_and_test() -> (Vec<Kind>, Arc<AtomicUsize>) {
        let (build, calls) = kind("build", vec![json!({"label": "build", "task": {}})]);
        let (test, _) = kind(
            "test",
            vec![json!({"label": "test", "task": {}, "dependencies": {"build": "build"}})],
        );
        (vec![build, test.with_kind_dependency("build")], calls)
    }

    #[tokio::test]
    async fn test_phases_are_memoized() {
        let (kinds, calls) = build_and_test();
        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), kinds);

        assert_eq!(generator.full_job_set().await.unwrap().len(), 2);
        assert_eq!(generator.optimized_job_graph().await.unwrap().len(), 2);
        assert_eq!(generator.full_job_graph().await.unwrap().graph().edges().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_phase_is_not_cached() {
        let (kinds, _) = build_and_test();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), kinds)
            .with_verification(
                "flaky",
                move |phase: Phase, _: &JobGraph, _: &Parameters, _: &GraphConfig| -> anyhow::Result<()> {
                    if phase == Phase::TargetJobSet && seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        anyhow::bail!("not yet");
                    }
                    Ok(())
                },
            );

        let err = generator.target_job_set().await.unwrap_err();
        assert!(matches!(err, TaskgraphError::Verification { ref phase, .. } if phase == "target_job_set"));
        assert!(generator.target_job_set.is_none());
        assert!(generator.full_job_graph.is_some());

        assert_eq!(generator.target_job_set().await.unwrap().len(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_labels_across_kinds() {
        let (a, _) = kind("a", vec![json!({"label": "same", "task": {}})]);
        let (b, _) = kind("b", vec![json!({"label": "same", "task": {}})]);
        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![a, b]);
        let err = generator.full_job_set().await.unwrap_err();
        assert!(matches!(err, TaskgraphError::DuplicateLabel { label } if label == "same"));
    }

    #[tokio::test]
    async fn test_unknown_dependency() {
        let (test, _) = kind(
            "test",
            vec![json!({"label": "test", "task": {}, "dependencies": {"build": "build"}})],
        );
        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![test]);
        let err = generator.full_job_graph().await.unwrap_err();
        assert!(matches!(err, TaskgraphError::UnknownDependency { .. }));
    }

    #[tokio::test]
    async fn test_kind_dependencies_see_loaded_jobs() {
        struct Downstream;

        #[async_trait]
        impl KindLoader for Downstream {
            async fn load(
                &self,
                _kind: &Kind,
                _params: &Parameters,
                _graph_config: &GraphConfig,
                loaded: &[Job],
            ) -> anyhow::Result<Vec<Value>> {
                Ok(loaded
                    .iter()
                    .map(|job| {
                        json!({
                            "label": format!("sign-{}", job.label),
                            "task": {},
                            "dependencies": {"build": job.label},
                        })
                    })
                    .collect())
            }
        }

        let (build, _) = kind(
            "build",
            vec![
                json!({"label": "build-a", "task": {}}),
                json!({"label": "build-b", "task": {}}),
            ],
        );
        let sign = Kind::new("sign", Arc::new(Downstream)).with_kind_dependency("build");
        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![sign, build]);

        let graph = generator.full_job_graph().await.unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph.get("sign-build-b").is_some());
        assert_eq!(graph.graph().edges().len(), 2);
    }

    #[tokio::test]
    async fn test_filters_narrow_in_order() {
        let (jobs, _) = kind(
            "build",
            vec![
                json!({"label": "build-linux", "task": {}}),
                json!({"label": "build-mac", "task": {}}),
                json!({"label": "build-win", "task": {}}),
            ],
        );
        let not_win = |graph: &JobGraph, _: &Parameters, _: &GraphConfig| -> anyhow::Result<Vec<Label>> {
            Ok(graph.iter().map(|j| j.label.clone()).filter(|l| !l.ends_with("win")).collect())
        };
        // Labels outside the previous selection are ignored.
        let linux_or_win = |_: &JobGraph, _: &Parameters, _: &GraphConfig| -> anyhow::Result<Vec<Label>> {
            Ok(vec!["build-linux".to_string(), "build-win".to_string()])
        };

        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![jobs])
            .with_filter("not-win", not_win)
            .with_filter("linux-or-win", linux_or_win);
        let target: Vec<&String> = generator.target_job_set().await.unwrap().jobs().keys().collect();
        assert_eq!(target, vec!["build-linux"]);
    }

    #[tokio::test]
    async fn test_filters_parameter_selects_filters() {
        let (jobs, _) = kind("build", vec![json!({"label": "build", "task": {}})]);
        let none = |_: &JobGraph, _: &Parameters, _: &GraphConfig| -> anyhow::Result<Vec<Label>> { Ok(Vec::new()) };

        let mut params = Parameters::default();
        params.filters = vec!["target-kinds".to_string()];
        let mut generator = Generator::new(params.clone(), GraphConfig::default(), vec![jobs.clone()])
            .with_filter("none", none);
        assert_eq!(generator.target_job_set().await.unwrap().len(), 1);

        params.filters = vec!["missing".to_string()];
        let mut generator = Generator::new(params, GraphConfig::default(), vec![jobs]);
        assert!(matches!(
            generator.target_job_set().await,
            Err(TaskgraphError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn test_target_tasks_method_makes_the_first_selection() {
        let (jobs, _) = kind(
            "build",
            vec![
                json!({"label": "build-linux", "task": {}}),
                json!({"label": "build-mac", "task": {}}),
            ],
        );
        let linux_only = |graph: &JobGraph, _: &Parameters, _: &GraphConfig| -> anyhow::Result<Vec<Label>> {
            Ok(graph.iter().map(|j| j.label.clone()).filter(|l| l.ends_with("linux")).collect())
        };

        let mut params = Parameters::default();
        params.target_tasks_method = "linux-only".to_string();
        let mut generator = Generator::new(params.clone(), GraphConfig::default(), vec![jobs.clone()])
            .with_target_tasks_method("linux-only", linux_only);
        let target: Vec<&String> = generator.target_job_set().await.unwrap().jobs().keys().collect();
        assert_eq!(target, vec!["build-linux"]);

        // Registered, but not the method the parameters ask for.
        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![jobs.clone()])
            .with_target_tasks_method("linux-only", linux_only);
        assert_eq!(generator.target_job_set().await.unwrap().len(), 2);

        let mut generator = Generator::new(params, GraphConfig::default(), vec![jobs]);
        let err = generator.target_job_set().await.unwrap_err();
        assert!(matches!(err, TaskgraphError::Config { ref message, .. } if message.contains("linux-only")));
    }

    #[tokio::test]
    async fn test_always_target_jobs_are_added() {
        let (jobs, _) = kind(
            "lint",
            vec![
                json!({"label": "lint", "task": {}, "attributes": {"always_target": true, "cron": true}}),
                json!({"label": "build", "task": {}}),
            ],
        );

        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![jobs.clone()]);
        assert_eq!(generator.target_job_set().await.unwrap().len(), 1);
        assert_eq!(generator.target_job_graph().await.unwrap().len(), 2);

        let mut params = Parameters::default();
        params.enable_always_target = false;
        let mut generator = Generator::new(params, GraphConfig::default(), vec![jobs]);
        assert_eq!(generator.target_job_graph().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_optimize_target_tasks_disabled() {
        let (jobs, _) = kind(
            "build",
            vec![json!({"label": "build", "task": {}, "optimization": {"always": null}})],
        );

        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), vec![jobs.clone()]);
        assert!(generator.optimized_job_graph().await.unwrap().is_empty());

        let mut params = Parameters::default();
        params.optimize_target_tasks = false;
        let mut generator = Generator::new(params, GraphConfig::default(), vec![jobs]);
        assert_eq!(generator.optimized_job_graph().await.unwrap().len(), 1);
        assert!(generator.label_to_id().await.unwrap().contains_key("build"));
    }

    #[tokio::test]
    async fn test_morphs_run_in_order() {
        let (kinds, _) = build_and_test();
        let drop_all = |_: JobGraph, _: LabelToId, _: &Parameters, _: &GraphConfig| -> anyhow::Result<(JobGraph, LabelToId)> {
            Ok((JobGraph::from_jobs(Vec::<Job>::new())?, LabelToId::new()))
        };
        let fail = |_: JobGraph, _: LabelToId, _: &Parameters, _: &GraphConfig| -> anyhow::Result<(JobGraph, LabelToId)> {
            anyhow::bail!("cannot morph")
        };

        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), kinds.clone())
            .with_morph("drop-all", drop_all);
        let (graph, label_to_id) = generator.generate().await.unwrap();
        assert!(graph.is_empty());
        assert!(label_to_id.is_empty());
        assert_eq!(generator.optimized_job_graph().await.unwrap().len(), 2);

        let mut generator = Generator::new(Parameters::default(), GraphConfig::default(), kinds)
            .with_morph("fail", fail);
        let err = generator.morphed_job_graph().await.unwrap_err();
        assert!(matches!(err, TaskgraphError::Morph { ref morph, .. } if morph == "fail"));
    }
}
