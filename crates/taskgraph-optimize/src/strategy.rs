//! Optimization strategies.
//!
//! A strategy decides, per job, whether the job can be removed from the graph
//! (Phase A) or replaced by an existing job (Phase B). Strategies form a
//! closed set of variants; a [`StrategyRegistry`] maps the names used in job
//! optimization directives to configured strategy values.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use taskgraph_core::{Job, JobId, Parameters};
use tracing::debug;

use crate::files_changed::{RevisionRange, VcsDiff};
use crate::index::IndexLookup;

/// Splits a composite strategy's argument into one argument per substrategy.
pub type ArgSplitter = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Outcome of [`OptimizationStrategy::should_replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replacement {
    /// The job must run.
    Keep,
    /// The job can be dropped without a replacement.
    Remove,
    /// The job can be replaced by this existing job.
    Replace(JobId),
}

impl Replacement {
    /// Whether the job does not need to run.
    pub fn is_optimized(&self) -> bool {
        !matches!(self, Replacement::Keep)
    }
}

/// Substrategies of a composite strategy.
#[derive(Clone)]
pub struct Composite {
    substrategies: Vec<OptimizationStrategy>,
    split_args: Option<ArgSplitter>,
}

impl Composite {
    /// Combine `substrategies`, passing each the composite's argument.
    pub fn new(substrategies: Vec<OptimizationStrategy>) -> Self {
        Self {
            substrategies,
            split_args: None,
        }
    }

    /// Split the composite's argument before handing it to substrategies.
    pub fn with_split_args<F>(mut self, split_args: F) -> Self
    where
        F: Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    {
        self.split_args = Some(Arc::new(split_args));
        self
    }

    fn pairs<'a>(&'a self, arg: &Value) -> Vec<(&'a OptimizationStrategy, Value)> {
        let args = match &self.split_args {
            Some(split) => split(arg),
            None => vec![arg.clone(); self.substrategies.len()],
        };
        self.substrategies.iter().zip(args).collect()
    }
}

/// An optimization strategy.
#[derive(Clone, Default)]
pub enum OptimizationStrategy {
    /// Never optimize.
    #[default]
    Never,

    /// Always remove.
    Always,

    /// Replace with the first job found under the given index keys.
    IndexSearch(Arc<dyn IndexLookup>),

    /// Remove unless a file matching the given patterns changed.
    SkipUnlessChanged(Arc<dyn VcsDiff>),

    /// First substrategy that optimizes wins.
    Either(Composite),

    /// Optimize only if every substrategy agrees.
    All(Composite),
}

impl fmt::Debug for OptimizationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStrategy::Either(c) | OptimizationStrategy::All(c) => f
                .debug_tuple(self.name())
                .field(&c.substrategies)
                .finish(),
            _ => f.write_str(self.name()),
        }
    }
}

impl OptimizationStrategy {
    /// Variant name, for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationStrategy::Never => "never",
            OptimizationStrategy::Always => "always",
            OptimizationStrategy::IndexSearch(_) => "index-search",
            OptimizationStrategy::SkipUnlessChanged(_) => "skip-unless-changed",
            OptimizationStrategy::Either(_) => "either",
            OptimizationStrategy::All(_) => "all",
        }
    }

    /// Combine strategies so that the first one that optimizes wins.
    pub fn either(substrategies: Vec<OptimizationStrategy>) -> Self {
        OptimizationStrategy::Either(Composite::new(substrategies))
    }

    /// Combine strategies so that all must agree.
    pub fn all(substrategies: Vec<OptimizationStrategy>) -> Self {
        OptimizationStrategy::All(Composite::new(substrategies))
    }

    /// Decide whether `job` can be removed from the graph.
    pub fn should_remove<'a>(
        &'a self,
        job: &'a Job,
        params: &'a Parameters,
        arg: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        async move {
            match self {
                OptimizationStrategy::Never | OptimizationStrategy::IndexSearch(_) => Ok(false),
                OptimizationStrategy::Always => Ok(true),
                OptimizationStrategy::SkipUnlessChanged(diff) => {
                    skip_unless_changed(diff.as_ref(), job, params, arg).await
                }
                OptimizationStrategy::Either(composite) => {
                    for (sub, sub_arg) in composite.pairs(arg) {
                        if sub.should_remove(job, params, &sub_arg).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                OptimizationStrategy::All(composite) => {
                    let pairs = composite.pairs(arg);
                    if pairs.is_empty() {
                        return Ok(false);
                    }
                    for (sub, sub_arg) in pairs {
                        if !sub.should_remove(job, params, &sub_arg).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
            }
        }
        .boxed()
    }

    /// Decide whether `job` can be replaced by an existing job.
    pub fn should_replace<'a>(
        &'a self,
        job: &'a Job,
        params: &'a Parameters,
        arg: &'a Value,
    ) -> BoxFuture<'a, anyhow::Result<Replacement>> {
        async move {
            match self {
                OptimizationStrategy::Never
                | OptimizationStrategy::Always
                | OptimizationStrategy::SkipUnlessChanged(_) => Ok(Replacement::Keep),
                OptimizationStrategy::IndexSearch(index) => {
                    index_search(index.as_ref(), job, arg).await
                }
                OptimizationStrategy::Either(composite) => {
                    for (sub, sub_arg) in composite.pairs(arg) {
                        let result = sub.should_replace(job, params, &sub_arg).await?;
                        if result.is_optimized() {
                            return Ok(result);
                        }
                    }
                    Ok(Replacement::Keep)
                }
                OptimizationStrategy::All(composite) => {
                    let mut last = Replacement::Keep;
                    for (sub, sub_arg) in composite.pairs(arg) {
                        last = sub.should_replace(job, params, &sub_arg).await?;
                        if !last.is_optimized() {
                            return Ok(Replacement::Keep);
                        }
                    }
                    Ok(last)
                }
            }
        }
        .boxed()
    }
}

fn string_list(arg: &Value, what: &str) -> anyhow::Result<Vec<String>> {
    match arg {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("{what} must be strings, got {item}"))
            })
            .collect(),
        other => bail!("{what} must be a list of strings, got {other}"),
    }
}

async fn index_search(index: &dyn IndexLookup, job: &Job, arg: &Value) -> anyhow::Result<Replacement> {
    for key in string_list(arg, "index-search keys")? {
        if let Some(job_id) = index.find_job(&key).await? {
            debug!("{} found in index at {} as {}", job.label, key, job_id);
            return Ok(Replacement::Replace(job_id));
        }
    }
    Ok(Replacement::Keep)
}

async fn skip_unless_changed(
    diff: &dyn VcsDiff,
    job: &Job,
    params: &Parameters,
    arg: &Value,
) -> anyhow::Result<bool> {
    // Scheduled runs have no meaningful revision range.
    if params.is_scheduled() {
        return Ok(false);
    }
    match params.repository_type.as_str() {
        "git" | "hg" => {}
        other => bail!("skip-unless-changed does not support repository type {other:?}"),
    }

    let patterns = string_list(arg, "skip-unless-changed patterns")?;
    let range = RevisionRange::from_parameters(params);
    if diff.files_changed(&range, &patterns).await? {
        return Ok(false);
    }
    debug!(
        "no files found matching a pattern in skip-unless-changed for {}",
        job.label
    );
    Ok(true)
}

/// Named strategies available to job optimization directives.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, OptimizationStrategy>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    /// A registry with only `never` and `always`.
    pub fn new() -> Self {
        let mut strategies = BTreeMap::new();
        strategies.insert("never".to_string(), OptimizationStrategy::Never);
        strategies.insert("always".to_string(), OptimizationStrategy::Always);
        Self { strategies }
    }

    /// A registry with the standard strategies backed by `index` and `diff`.
    pub fn with_backends(index: Arc<dyn IndexLookup>, diff: Arc<dyn VcsDiff>) -> Self {
        Self::new()
            .register("index-search", OptimizationStrategy::IndexSearch(index))
            .register("skip-unless-changed", OptimizationStrategy::SkipUnlessChanged(diff))
    }

    /// Register (or replace) a named strategy.
    pub fn register(mut self, name: impl Into<String>, strategy: OptimizationStrategy) -> Self {
        self.strategies.insert(name.into(), strategy);
        self
    }

    /// Look up a strategy by name.
    pub fn get(&self, name: &str) -> Option<&OptimizationStrategy> {
        self.strategies.get(name)
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    /// The strategy, its registered name and its argument for `job`.
    ///
    /// Jobs without an optimization directive use `never`.
    pub fn for_job<'a>(&'a self, job: &'a Job) -> anyhow::Result<(&'a str, &'a OptimizationStrategy, &'a Value)> {
        static NEVER: OptimizationStrategy = OptimizationStrategy::Never;
        static NULL: Value = Value::Null;
        match &job.optimization {
            None => Ok(("never", &NEVER, &NULL)),
            Some(opt) => {
                let strategy = self.get(&opt.strategy).ok_or_else(|| {
                    anyhow!(
                        "unknown optimization strategy {:?} (known: {})",
                        opt.strategy,
                        self.names().collect::<Vec<_>>().join(", ")
                    )
                })?;
                Ok((opt.strategy.as_str(), strategy, &opt.arg))
            }
        }
    }
}
