//! Target-selection filters.
//!
//! Filters run in order; each sees the jobs the previous ones selected and
//! returns the labels it keeps.

use serde_json::Value;
use taskgraph_core::{GraphConfig, Job, JobGraph, Label, Parameters};

/// Narrows the set of target jobs.
pub trait TargetFilter: Send + Sync {
    /// Labels of `candidates` to keep.
    fn filter(
        &self,
        candidates: &JobGraph,
        params: &Parameters,
        graph_config: &GraphConfig,
    ) -> anyhow::Result<Vec<Label>>;
}

impl<F> TargetFilter for F
where
    F: Fn(&JobGraph, &Parameters, &GraphConfig) -> anyhow::Result<Vec<Label>> + Send + Sync,
{
    fn filter(
        &self,
        candidates: &JobGraph,
        params: &Parameters,
        graph_config: &GraphConfig,
    ) -> anyhow::Result<Vec<Label>> {
        self(candidates, params, graph_config)
    }
}

/// Whether `value` (a list attribute, or absent) allows `wanted`.
///
/// An absent attribute allows everything, as does the entry `"all"`.
fn list_allows(value: Option<&Value>, wanted: &str) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s == "all" || s == wanted,
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s == "all" || s == wanted),
        Some(_) => false,
    }
}

/// The default target selection.
///
/// Keeps jobs whose `run_on_projects` and `run_on_tasks_for` attributes allow
/// the run, and drops jobs marked with a truthy `cron` attribute, which only
/// run from their own schedules.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardFilter;

impl StandardFilter {
    /// Whether `job` is selected for a run with `params`.
    pub fn selects(job: &Job, params: &Parameters) -> bool {
        let cron = job.attribute("cron").and_then(Value::as_bool).unwrap_or(false);
        !cron
            && list_allows(job.attribute("run_on_projects"), &params.project)
            && list_allows(job.attribute("run_on_tasks_for"), &params.tasks_for)
    }
}

impl TargetFilter for StandardFilter {
    fn filter(
        &self,
        candidates: &JobGraph,
        params: &Parameters,
        _graph_config: &GraphConfig,
    ) -> anyhow::Result<Vec<Label>> {
        Ok(candidates
            .iter()
            .filter(|job| Self::selects(job, params))
            .map(|job| job.label.clone())
            .collect())
    }
}

/// Keeps jobs of the kinds listed in the `target_kinds` parameter.
///
/// An empty `target_kinds` keeps everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct KindFilter;

impl TargetFilter for KindFilter {
    fn filter(
        &self,
        candidates: &JobGraph,
        params: &Parameters,
        _graph_config: &GraphConfig,
    ) -> anyhow::Result<Vec<Label>> {
        Ok(candidates
            .iter()
            .filter(|job| params.target_kinds.is_empty() || params.target_kinds.contains(&job.kind))
            .map(|job| job.label.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidates() -> JobGraph {
        JobGraph::from_jobs([
            Job::new("build", "build-linux"),
            Job::new("build", "build-main-only").with_attribute("run_on_projects", json!(["main"])),
            Job::new("test", "test-pr-only").with_attribute("run_on_tasks_for", json!(["github-pull-request"])),
            Job::new("test", "test-nightly").with_attribute("cron", json!(true)),
            Job::new("docs", "docs-everywhere").with_attribute("run_on_projects", json!(["all"])),
        ])
        .unwrap()
    }

    #[test]
    fn test_standard_filter() {
        let params = Parameters::default().with_project("main");
        let mut labels = StandardFilter
            .filter(&candidates(), &params, &GraphConfig::default())
            .unwrap();
        labels.sort();
        assert_eq!(labels, vec!["build-linux", "build-main-only", "docs-everywhere"]);

        let params = Parameters::default()
            .with_project("release")
            .with_tasks_for("github-pull-request");
        let mut labels = StandardFilter
            .filter(&candidates(), &params, &GraphConfig::default())
            .unwrap();
        labels.sort();
        assert_eq!(labels, vec!["build-linux", "docs-everywhere", "test-pr-only"]);
    }

    #[test]
    fn test_kind_filter() {
        let mut params = Parameters::default();
        let all = KindFilter.filter(&candidates(), &params, &GraphConfig::default()).unwrap();
        assert_eq!(all.len(), 5);

        params.target_kinds = vec!["test".to_string()];
        let mut labels = KindFilter.filter(&candidates(), &params, &GraphConfig::default()).unwrap();
        labels.sort();
        assert_eq!(labels, vec!["test-nightly", "test-pr-only"]);
    }

    #[test]
    fn test_closures_are_filters() {
        let only_linux = |graph: &JobGraph, _: &Parameters, _: &GraphConfig| -> anyhow::Result<Vec<Label>> {
            Ok(graph
                .iter()
                .filter(|j| j.label.ends_with("linux"))
                .map(|j| j.label.clone())
                .collect())
        };
        let labels = only_linux
            .filter(&candidates(), &Parameters::default(), &GraphConfig::default())
            .unwrap();
        assert_eq!(labels, vec!["build-linux"]);
    }
}
