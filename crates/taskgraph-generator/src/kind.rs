//! Kinds: families of jobs produced by one loader and transform pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskgraph_core::{Graph, GraphConfig, Job, Parameters, Result, TaskgraphError};
use tracing::debug;

/// Edge name used in the kind ordering graph.
const KIND_DEPENDENCY: &str = "kind-dependency";

/// Per-kind configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct KindConfig {
    /// Kinds whose jobs must be loaded before this one.
    pub kind_dependencies: Vec<String>,

    /// Everything else; interpreted by the loader and transforms.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl KindConfig {
    /// Parse a kind configuration document.
    pub fn from_value(kind: &str, value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| TaskgraphError::config(format!("kind {kind}"), e.to_string()))
    }

    /// Load a kind configuration from a YAML (or JSON) file.
    pub fn load(kind: &str, path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|e| TaskgraphError::config(format!("kind {kind}"), e.to_string()))
    }
}

/// Produces the raw task documents of a kind.
#[async_trait]
pub trait KindLoader: Send + Sync {
    /// Load the documents for `kind`.
    ///
    /// `loaded` holds the jobs of the kind's kind-dependencies.
    async fn load(
        &self,
        kind: &Kind,
        params: &Parameters,
        graph_config: &GraphConfig,
        loaded: &[Job],
    ) -> anyhow::Result<Vec<Value>>;
}

/// What a transform can see besides the documents.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Name of the kind being transformed.
    pub kind: &'a str,
    /// The kind's configuration.
    pub config: &'a KindConfig,
    pub params: &'a Parameters,
    pub graph_config: &'a GraphConfig,
}

/// One step of a kind's transform pipeline.
pub trait Transform: Send + Sync {
    /// Rewrite `documents`, returning the documents for the next step.
    fn transform(&self, ctx: &TransformContext<'_>, documents: Vec<Value>) -> anyhow::Result<Vec<Value>>;
}

impl<F> Transform for F
where
    F: Fn(&TransformContext<'_>, Vec<Value>) -> anyhow::Result<Vec<Value>> + Send + Sync,
{
    fn transform(&self, ctx: &TransformContext<'_>, documents: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        self(ctx, documents)
    }
}

/// Loads the `jobs` map of a kind configuration.
///
/// Each entry becomes one document: `job-defaults` overlaid with the entry,
/// plus a `name` field holding the entry's key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigJobsLoader;

#[async_trait]
impl KindLoader for ConfigJobsLoader {
    async fn load(
        &self,
        kind: &Kind,
        _params: &Parameters,
        _graph_config: &GraphConfig,
        _loaded: &[Job],
    ) -> anyhow::Result<Vec<Value>> {
        let defaults = match kind.config().extra.get("job-defaults") {
            None => serde_json::Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(other) => anyhow::bail!("job-defaults must be a map, got {other}"),
        };
        let jobs = match kind.config().extra.get("jobs") {
            None => return Ok(Vec::new()),
            Some(Value::Object(map)) => map,
            Some(other) => anyhow::bail!("jobs must be a map, got {other}"),
        };

        let mut documents = Vec::with_capacity(jobs.len());
        for (name, job) in jobs {
            let Value::Object(fields) = job else {
                anyhow::bail!("job {name} must be a map, got {job}");
            };
            let mut document = defaults.clone();
            document.extend(fields.clone());
            document.insert("name".to_string(), Value::String(name.clone()));
            documents.push(Value::Object(document));
        }
        Ok(documents)
    }
}

/// A kind.
#[derive(Clone)]
pub struct Kind {
    name: String,
    config: KindConfig,
    loader: Arc<dyn KindLoader>,
    transforms: Vec<Arc<dyn Transform>>,
}

impl fmt::Debug for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kind")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

impl Kind {
    /// Create a kind with an empty configuration and no transforms.
    pub fn new(name: impl Into<String>, loader: Arc<dyn KindLoader>) -> Self {
        Self {
            name: name.into(),
            config: KindConfig::default(),
            loader,
            transforms: Vec::new(),
        }
    }

    /// Set the kind's configuration.
    pub fn with_config(mut self, config: KindConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a transform to the pipeline.
    pub fn with_transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Arc::new(transform));
        self
    }

    /// Load after `kind`.
    pub fn with_kind_dependency(mut self, kind: impl Into<String>) -> Self {
        self.config.kind_dependencies.push(kind.into());
        self
    }

    /// The kind's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The kind's configuration.
    pub fn config(&self) -> &KindConfig {
        &self.config
    }

    /// Kinds loaded before this one.
    pub fn kind_dependencies(&self) -> &[String] {
        &self.config.kind_dependencies
    }

    /// Run the loader and transforms, producing this kind's jobs.
    pub async fn load_jobs(
        &self,
        params: &Parameters,
        graph_config: &GraphConfig,
        loaded: &[Job],
    ) -> Result<Vec<Job>> {
        let wrap = |source| TaskgraphError::KindLoad {
            kind: self.name.clone(),
            source,
        };

        let mut documents = self
            .loader
            .load(self, params, graph_config, loaded)
            .await
            .map_err(wrap)?;

        let ctx = TransformContext {
            kind: &self.name,
            config: &self.config,
            params,
            graph_config,
        };
        for transform in &self.transforms {
            documents = transform.transform(&ctx, documents).map_err(wrap)?;
        }
        debug!("kind {} produced {} documents", self.name, documents.len());

        documents
            .into_iter()
            .map(|document| Job::from_task_dict(&self.name, document))
            .collect()
    }
}

/// The graph of kinds, with an edge from each kind to its kind-dependencies.
pub fn kind_graph(kinds: &[Kind]) -> Result<Graph> {
    let names: BTreeSet<String> = kinds.iter().map(|k| k.name.clone()).collect();
    if names.len() != kinds.len() {
        return Err(TaskgraphError::config("kinds", "kind names must be unique"));
    }

    let mut edges = BTreeSet::new();
    for kind in kinds {
        for dependency in kind.kind_dependencies() {
            if !names.contains(dependency) {
                return Err(TaskgraphError::config(
                    format!("kind {}", kind.name),
                    format!("unknown kind-dependency {dependency}"),
                ));
            }
            edges.insert((kind.name.clone(), dependency.clone(), KIND_DEPENDENCY.to_string()));
        }
    }
    Ok(Graph::new(names, edges))
}

/// Kinds to load, each after its kind-dependencies.
///
/// With `target_kinds` set, only those kinds and what they depend on are
/// loaded.
pub fn load_order<'a>(kinds: &'a [Kind], target_kinds: &[String]) -> Result<Vec<&'a Kind>> {
    let mut graph = kind_graph(kinds)?;
    if !target_kinds.is_empty() {
        let targets: BTreeSet<String> = target_kinds.iter().cloned().collect();
        graph = graph.transitive_closure(&targets, false)?;
    }

    let by_name: BTreeMap<&str, &Kind> = kinds.iter().map(|k| (k.name(), k)).collect();
    let mut order = Vec::with_capacity(graph.nodes().len());
    for name in graph.visit_postorder() {
        let name = name?;
        if let Some(kind) = by_name.get(name.as_str()) {
            order.push(*kind);
        }
    }
    Ok(order)
}
