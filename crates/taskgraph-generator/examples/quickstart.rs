//! Generate and print an optimized job graph for a small project.
//!
//! Run with `RUST_LOG=debug` to see every optimization decision.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use taskgraph_core::{GraphConfig, JobId, Parameters};
use taskgraph_generator::{ConfigJobsLoader, Generator, Kind, KindConfig, MaxDependencies, TransformContext};
use taskgraph_optimize::{ChangedFiles, InMemoryIndex, StrategyRegistry};
use tracing::info;
use tracing_subscriber::EnvFilter;

const BUILD_KIND: &str = r#"
job-defaults:
  worker: linux
jobs:
  linux:
    command: cargo build --release
    optimization:
      index-search: ["quickstart.cache.build-linux"]
  docs:
    command: cargo doc
    optimization:
      skip-unless-changed: ["docs/**", "src/**/*.rs"]
"#;

const TEST_KIND: &str = r#"
kind-dependencies: [build]
jobs:
  linux:
    command: cargo test
    build: build-linux
"#;

/// Turns `jobs` entries into task documents.
fn to_task(ctx: &TransformContext<'_>, documents: Vec<Value>) -> anyhow::Result<Vec<Value>> {
    documents
        .into_iter()
        .map(|doc| {
            let name = doc["name"].as_str().context("job without a name")?;
            let label = format!("{}-{}", ctx.kind, name);
            let mut dependencies = serde_json::Map::new();
            let mut env = serde_json::Map::new();
            if let Some(build) = doc.get("build") {
                dependencies.insert("build".to_string(), build.clone());
                env.insert(
                    "BUILD_ARTIFACT".to_string(),
                    json!({"artifact-reference": "<build/public/build/target.tar.gz>"}),
                );
            }
            Ok(json!({
                "label": label,
                "description": format!("{} {}", ctx.kind, name),
                "dependencies": dependencies,
                "optimization": doc.get("optimization").cloned().unwrap_or(Value::Null),
                "task": {
                    "worker": doc["worker"],
                    "command": doc["command"],
                    "env": env,
                    "deadline": {"relative-datestamp": "1 day"},
                },
            }))
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Generating job graph");

    let build: KindConfig = serde_yaml::from_str(BUILD_KIND)?;
    let test: KindConfig = serde_yaml::from_str(TEST_KIND)?;
    let kinds = vec![
        Kind::new("build", Arc::new(ConfigJobsLoader))
            .with_config(build)
            .with_transform(to_task),
        Kind::new("test", Arc::new(ConfigJobsLoader))
            .with_config(test)
            .with_transform(to_task),
    ];

    // Nothing under docs/ changed, and no cached build exists yet.
    let strategies = StrategyRegistry::with_backends(
        Arc::new(InMemoryIndex::new()),
        Arc::new(ChangedFiles::new(["Cargo.toml"])),
    );

    let params = Parameters::default()
        .with_project("quickstart")
        .with_revisions("abc", "def");
    let mut generator = Generator::new(params, GraphConfig::default(), kinds)
        .with_strategies(strategies)
        .with_verification("max-dependencies", MaxDependencies::default())
        .with_decision_job_id(JobId::generate());

    let (graph, label_to_id) = generator.generate().await?;
    for (label, id) in &label_to_id {
        info!("{label} -> {id}");
    }
    println!("{}", graph.to_json_string()?);
    info!("✅ {} jobs ready for submission", graph.len());
    Ok(())
}
