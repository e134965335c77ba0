//! Job records.
//!
//! A [`Job`] is a value record produced by a kind's loader and transforms. It
//! is identified by its label until the optimizer assigns it a [`JobId`].

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, TaskgraphError};

/// Human-assigned job name, unique within a run.
pub type Label = String;

/// Backend identifier of a job that survived optimization or was reused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Allocate a fresh, globally-unique identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the id, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Optimization directive of a job: a strategy name and its argument.
///
/// Persisted as a single-key map `{strategy: arg}`. A missing directive, a
/// `null`, or the string `"never"` all mean "no optimization".
#[derive(Debug, Clone, PartialEq)]
pub struct Optimization {
    /// Registered strategy name (e.g. `"index-search"`).
    pub strategy: String,

    /// Strategy-specific argument.
    pub arg: Value,
}

impl Optimization {
    /// Create a directive for the named strategy.
    pub fn new(strategy: impl Into<String>, arg: Value) -> Self {
        Self {
            strategy: strategy.into(),
            arg,
        }
    }

    /// Parse a directive from its document form.
    pub fn from_value(value: &Value) -> std::result::Result<Option<Self>, String> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) if s == "never" => Ok(None),
            Value::Object(map) if map.len() == 1 => {
                let (strategy, arg) = map.iter().next().ok_or("empty optimization")?;
                Ok(Some(Self::new(strategy.clone(), arg.clone())))
            }
            other => Err(format!(
                "optimization must be null, \"never\" or a single-key map, got {other}"
            )),
        }
    }

    /// The document form of this directive.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert(self.strategy.clone(), self.arg.clone());
        Value::Object(map)
    }
}

fn serialize_optimization<S>(
    optimization: &Option<Optimization>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match optimization {
        Some(opt) => opt.to_value().serialize(serializer),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optimization<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Optimization>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Optimization::from_value(&value).map_err(D::Error::custom)
}

/// A unit of work before submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Kind that produced this job.
    pub kind: String,

    /// Unique label.
    pub label: Label,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Attributes used by filters and strategies. Always contains `kind`.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,

    /// Opaque job definition handed to the execution backend.
    #[serde(default)]
    pub payload: Value,

    /// Optimization directive.
    #[serde(
        default,
        serialize_with = "serialize_optimization",
        deserialize_with = "deserialize_optimization"
    )]
    pub optimization: Option<Optimization>,

    /// Named dependencies: dependency name -> label.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Label>,

    /// Labels this job should follow if they are present; may dangle.
    #[serde(default)]
    pub soft_dependencies: Vec<Label>,

    /// Dependency names gating whether this job runs at all.
    #[serde(default)]
    pub if_dependencies: Vec<String>,

    /// Backend identifier, set once the job survives optimization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl Job {
    /// Create a job with an empty payload.
    pub fn new(kind: impl Into<String>, label: impl Into<Label>) -> Self {
        let kind = kind.into();
        let mut attributes = BTreeMap::new();
        attributes.insert("kind".to_string(), Value::String(kind.clone()));
        Self {
            kind,
            label: label.into(),
            description: String::new(),
            attributes,
            payload: Value::Object(serde_json::Map::new()),
            optimization: None,
            dependencies: BTreeMap::new(),
            soft_dependencies: Vec::new(),
            if_dependencies: Vec::new(),
            job_id: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the optimization directive.
    pub fn with_optimization(mut self, strategy: impl Into<String>, arg: Value) -> Self {
        self.optimization = Some(Optimization::new(strategy, arg));
        self
    }

    /// Add a named dependency.
    pub fn depends_on(mut self, name: impl Into<String>, label: impl Into<Label>) -> Self {
        self.dependencies.insert(name.into(), label.into());
        self
    }

    /// Add a soft dependency.
    pub fn soft_depends_on(mut self, label: impl Into<Label>) -> Self {
        self.soft_dependencies.push(label.into());
        self
    }

    /// Gate this job on a dependency name.
    pub fn run_if(mut self, name: impl Into<String>) -> Self {
        self.if_dependencies.push(name.into());
        self
    }

    /// Look up an attribute.
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Build a job from a transformed task document.
    ///
    /// The document carries `label`, `task` and optionally `description`,
    /// `attributes`, `optimization`, `dependencies`, `soft-dependencies` and
    /// `if-dependencies`.
    pub fn from_task_dict(kind: &str, document: Value) -> Result<Self> {
        let context = format!("kind {kind}");
        let dict: TaskDocument = serde_json::from_value(document)
            .map_err(|e| TaskgraphError::config(context.as_str(), e.to_string()))?;

        if dict.label.trim().is_empty() {
            return Err(TaskgraphError::config(context, "task label cannot be empty"));
        }
        for name in &dict.if_dependencies {
            if !dict.dependencies.contains_key(name) {
                return Err(TaskgraphError::config(
                    context,
                    format!(
                        "task {} lists if-dependency {name} which is not one of its dependencies",
                        dict.label
                    ),
                ));
            }
        }

        let mut attributes = dict.attributes;
        attributes.insert("kind".to_string(), Value::String(kind.to_string()));

        Ok(Self {
            kind: kind.to_string(),
            label: dict.label,
            description: dict.description,
            attributes,
            payload: dict.task,
            optimization: dict.optimization,
            dependencies: dict.dependencies,
            soft_dependencies: dict.soft_dependencies,
            if_dependencies: dict.if_dependencies,
            job_id: None,
        })
    }
}

/// Task document shape emitted by kind transforms.
#[derive(Debug, Deserialize)]
struct TaskDocument {
    label: Label,
    #[serde(default)]
    description: String,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    task: Value,
    #[serde(default, deserialize_with = "deserialize_optimization")]
    optimization: Option<Optimization>,
    #[serde(default)]
    dependencies: BTreeMap<String, Label>,
    #[serde(default, alias = "soft-dependencies")]
    soft_dependencies: Vec<Label>,
    #[serde(default, alias = "if-dependencies")]
    if_dependencies: Vec<String>,
}
