//! Run parameters.
//!
//! Parameters describe the trigger of a generation run: which repository and
//! revision range, which project, why the run happened, and knobs for target
//! selection and optimization.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TaskgraphError};
use crate::job::JobId;

/// Parameters of a generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    /// Project (branch/tree) name the run is for.
    pub project: String,

    /// Trust level of the run.
    pub level: String,

    /// Why the run was triggered (e.g. `"github-push"`, `"cron"`).
    pub tasks_for: String,

    /// Version control system backing the repository (`"git"` or `"hg"`).
    pub repository_type: String,

    /// Repository the base revision lives in.
    pub base_repository: String,

    /// Repository the head revision lives in.
    pub head_repository: String,

    /// Start of the revision range that triggered the run.
    pub base_rev: String,

    /// End of the revision range that triggered the run.
    pub head_rev: String,

    /// Names of the target-selection filters to apply, in order.
    pub filters: Vec<String>,

    /// Kinds to generate; empty means all kinds.
    pub target_kinds: Vec<String>,

    /// Method used to pick target jobs (e.g. `"default"`).
    pub target_tasks_method: String,

    /// Labels that must never be optimized away.
    pub do_not_optimize: Vec<String>,

    /// Labels already scheduled elsewhere, bound to their job ids.
    pub existing_tasks: BTreeMap<String, JobId>,

    /// Whether jobs selected by the filters may be optimized.
    pub optimize_target_tasks: bool,

    /// Whether jobs with the `always_target` attribute are always selected.
    pub enable_always_target: bool,

    /// Time the run was started.
    pub build_date: DateTime<Utc>,

    /// Additional, project-specific parameters.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            project: "default".to_string(),
            level: "1".to_string(),
            tasks_for: "github-push".to_string(),
            repository_type: "git".to_string(),
            base_repository: String::new(),
            head_repository: String::new(),
            base_rev: String::new(),
            head_rev: String::new(),
            filters: Vec::new(),
            target_kinds: Vec::new(),
            target_tasks_method: "default".to_string(),
            do_not_optimize: Vec::new(),
            existing_tasks: BTreeMap::new(),
            optimize_target_tasks: true,
            enable_always_target: true,
            build_date: Utc::now(),
            extra: BTreeMap::new(),
        }
    }
}

impl Parameters {
    /// Load parameters from a `.json`, `.yml` or `.yaml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_document(path.as_ref())
    }

    /// Set the project.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Set the trigger reason.
    pub fn with_tasks_for(mut self, tasks_for: impl Into<String>) -> Self {
        self.tasks_for = tasks_for.into();
        self
    }

    /// Set the revision range.
    pub fn with_revisions(mut self, base_rev: impl Into<String>, head_rev: impl Into<String>) -> Self {
        self.base_rev = base_rev.into();
        self.head_rev = head_rev.into();
        self
    }

    /// Whether the run was triggered on a schedule rather than by a push.
    pub fn is_scheduled(&self) -> bool {
        self.tasks_for == "cron"
    }

    /// Look up an extra parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }
}

/// Read a serde document from JSON or YAML depending on the file extension.
pub(crate) fn load_document<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let text = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(serde_json::from_str(&text)?),
        Some("yml") | Some("yaml") => Ok(serde_yaml::from_str(&text)?),
        _ => Err(TaskgraphError::config(
            path.display().to_string(),
            "expected a .json, .yml or .yaml file",
        )),
    }
}
