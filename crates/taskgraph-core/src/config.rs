//! Graph-wide configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::parameters::load_document;

/// Configuration shared by every kind of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GraphConfig {
    /// Prefix for index routes and scopes of this project.
    pub trust_domain: String,

    /// Root URL of the execution backend, used to build artifact locators.
    pub root_url: String,

    /// Remaining project configuration, opaque to the core.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            trust_domain: "taskgraph".to_string(),
            root_url: "https://tc.example.com".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

impl GraphConfig {
    /// Load configuration from a `.json`, `.yml` or `.yaml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        load_document(path.as_ref())
    }

    /// Set the backend root URL.
    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    /// Public URL of an artifact produced by a job.
    pub fn artifact_url(&self, job_id: &str, path: &str) -> String {
        format!(
            "{}/api/queue/v1/task/{}/artifacts/{}",
            self.root_url.trim_end_matches('/'),
            job_id,
            path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_url() {
        let config = GraphConfig::default().with_root_url("https://ci.example.org/");
        assert_eq!(
            config.artifact_url("abc123", "public/build/target.tar.gz"),
            "https://ci.example.org/api/queue/v1/task/abc123/artifacts/public/build/target.tar.gz"
        );
    }

    #[test]
    fn test_kebab_case_keys() {
        let config: GraphConfig = serde_yaml::from_str(
            "trust-domain: myproject\nroot-url: https://ci.example.org\nworkers:\n  pool: default\n",
        )
        .unwrap();
        assert_eq!(config.trust_domain, "myproject");
        assert!(config.extra.contains_key("workers"));
    }
}
