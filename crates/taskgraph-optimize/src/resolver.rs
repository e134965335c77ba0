//! Late-binding reference resolution in job payloads.
//!
//! Payloads may contain single-key maps that are placeholders for values only
//! known once every job has an id:
//!
//! - `{"job-reference": "... <name> ..."}` - `<self>` is the job's own id,
//!   `<decision>` the decision job's id, and any other name the id of the
//!   dependency with that name. `<<>` produces a literal `<`.
//! - `{"artifact-reference": "... <name/path> ..."}` - the URL of a public
//!   artifact of the named dependency (or of the decision job).
//! - `{"relative-datestamp": "3 days"}` - a timestamp relative to the
//!   generation time.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use regex::{Captures, Regex};
use serde_json::Value;
use taskgraph_core::{GraphConfig, JobId, Result, TaskgraphError};

fn job_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<([^>]+)>").expect("valid job-reference pattern"))
}

fn artifact_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<([^/>]+)/([^>]+)>").expect("valid artifact-reference pattern"))
}

fn datestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(-)?\s*(\d+)\s*([a-z]+)\s*$").expect("valid relative-datestamp pattern")
    })
}

/// Everything needed to resolve the references of one job.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceContext<'a> {
    /// Label of the job being resolved, for error messages.
    pub label: &'a str,

    /// The job's own id.
    pub job_id: &'a JobId,

    /// Id of the decision job that generated the graph.
    pub decision_job_id: &'a JobId,

    /// Dependency name -> resolved id.
    pub dependencies: &'a BTreeMap<String, JobId>,

    /// Used for artifact URLs.
    pub graph_config: &'a GraphConfig,

    /// Reference point for relative datestamps.
    pub now: DateTime<Utc>,
}

impl ReferenceContext<'_> {
    fn dependency(&self, name: &str) -> Result<&JobId> {
        self.dependencies.get(name).ok_or_else(|| {
            TaskgraphError::reference(self.label, format!("job has no dependency named {name:?}"))
        })
    }
}

/// Resolve every reference in `payload` in place.
pub fn resolve_references(payload: &mut Value, ctx: &ReferenceContext<'_>) -> Result<()> {
    if let Some(resolved) = resolve_placeholder(payload, ctx)? {
        *payload = resolved;
        return Ok(());
    }
    match payload {
        Value::Object(map) => {
            for value in map.values_mut() {
                resolve_references(value, ctx)?;
            }
        }
        Value::Array(items) => {
            for value in items.iter_mut() {
                resolve_references(value, ctx)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn resolve_placeholder(value: &Value, ctx: &ReferenceContext<'_>) -> Result<Option<Value>> {
    let Value::Object(map) = value else {
        return Ok(None);
    };
    if map.len() != 1 {
        return Ok(None);
    }
    let Some((key, inner)) = map.iter().next() else {
        return Ok(None);
    };

    let resolved = match key.as_str() {
        "job-reference" => job_reference(expect_str(key, inner, ctx)?, ctx)?,
        "artifact-reference" => artifact_reference(expect_str(key, inner, ctx)?, ctx)?,
        "relative-datestamp" => relative_datestamp(expect_str(key, inner, ctx)?, ctx)?,
        _ => return Ok(None),
    };
    Ok(Some(Value::String(resolved)))
}

fn expect_str<'v>(key: &str, value: &'v Value, ctx: &ReferenceContext<'_>) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| TaskgraphError::reference(ctx.label, format!("{key} must be a string, got {value}")))
}

/// Substitute every match of `pattern` in `text`, failing on the first error.
fn replace_all<F>(pattern: &Regex, text: &str, mut replace: F) -> Result<String>
where
    F: FnMut(&Captures<'_>) -> Result<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replace(&caps)?);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn job_reference(text: &str, ctx: &ReferenceContext<'_>) -> Result<String> {
    replace_all(job_reference_pattern(), text, |caps| {
        let name = &caps[1];
        match name {
            "self" => Ok(ctx.job_id.to_string()),
            "decision" => Ok(ctx.decision_job_id.to_string()),
            "<" => Ok("<".to_string()),
            _ => Ok(ctx.dependency(name)?.to_string()),
        }
    })
}

fn artifact_reference(text: &str, ctx: &ReferenceContext<'_>) -> Result<String> {
    replace_all(artifact_reference_pattern(), text, |caps| {
        let (name, path) = (&caps[1], &caps[2]);
        let job_id = match name {
            "self" => {
                return Err(TaskgraphError::reference(
                    ctx.label,
                    "a job cannot reference its own artifacts",
                ))
            }
            "decision" => ctx.decision_job_id,
            _ => ctx.dependency(name)?,
        };
        if !path.starts_with("public/") {
            return Err(TaskgraphError::reference(
                ctx.label,
                format!("artifact-reference to non-public artifact {path:?}"),
            ));
        }
        Ok(ctx.graph_config.artifact_url(job_id.as_str(), path))
    })
}

fn relative_datestamp(text: &str, ctx: &ReferenceContext<'_>) -> Result<String> {
    let invalid = || TaskgraphError::reference(ctx.label, format!("invalid relative-datestamp {text:?}"));
    let caps = datestamp_pattern().captures(text).ok_or_else(invalid)?;

    let amount: i64 = caps[2].parse().map_err(|_| invalid())?;
    let seconds_per_unit = match &caps[3] {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 7 * 86_400,
        "mo" | "month" | "months" => 30 * 86_400,
        "y" | "year" | "years" => 365 * 86_400,
        _ => return Err(invalid()),
    };
    let seconds = amount.checked_mul(seconds_per_unit).ok_or_else(invalid)?;
    let offset = Duration::try_seconds(seconds).ok_or_else(invalid)?;

    let when = if caps.get(1).is_some() {
        ctx.now.checked_sub_signed(offset)
    } else {
        ctx.now.checked_add_signed(offset)
    }
    .ok_or_else(invalid)?;
    Ok(when.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    struct Fixture {
        job_id: JobId,
        decision: JobId,
        dependencies: BTreeMap<String, JobId>,
        config: GraphConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let mut dependencies = BTreeMap::new();
            dependencies.insert("build".to_string(), JobId::new("abc123"));
            dependencies.insert("toolchain".to_string(), JobId::new("tc999"));
            Self {
                job_id: JobId::new("self-id"),
                decision: JobId::new("decision-id"),
                dependencies,
                config: GraphConfig::default().with_root_url("https://ci.example.org"),
            }
        }

        fn ctx(&self) -> ReferenceContext<'_> {
            ReferenceContext {
                label: "test-unit",
                job_id: &self.job_id,
                decision_job_id: &self.decision,
                dependencies: &self.dependencies,
                graph_config: &self.config,
                now: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            }
        }
    }

    #[test]
    fn test_nested_job_reference() {
        let fixture = Fixture::new();
        let mut payload = json!({"env": {"FOO": {"job-reference": "<build>"}}});
        resolve_references(&mut payload, &fixture.ctx()).unwrap();
        assert_eq!(payload, json!({"env": {"FOO": "abc123"}}));
    }

    #[test]
    fn test_self_decision_and_escape() {
        let fixture = Fixture::new();
        let mut payload = json!([
            {"job-reference": "<self>:<decision>"},
            {"job-reference": "<<>build> is <build>"},
        ]);
        resolve_references(&mut payload, &fixture.ctx()).unwrap();
        assert_eq!(payload, json!(["self-id:decision-id", "<build> is abc123"]));
    }

    #[test]
    fn test_unknown_dependency_fails() {
        let fixture = Fixture::new();
        let mut payload = json!({"x": {"job-reference": "<docs>"}});
        let err = resolve_references(&mut payload, &fixture.ctx()).unwrap_err();
        assert!(matches!(err, TaskgraphError::ReferenceResolution { .. }));
        assert!(err.to_string().contains("docs"));
    }

    #[test]
    fn test_artifact_reference() {
        let fixture = Fixture::new();
        let mut payload = json!({"url": {"artifact-reference": "<build/public/target.tar.gz>"}});
        resolve_references(&mut payload, &fixture.ctx()).unwrap();
        assert_eq!(
            payload["url"],
            "https://ci.example.org/api/queue/v1/task/abc123/artifacts/public/target.tar.gz"
        );
    }

    #[test]
    fn test_artifact_reference_errors() {
        let fixture = Fixture::new();
        for bad in [
            "<self/public/x>",
            "<build/private/secret>",
            "<missing/public/x>",
        ] {
            let mut payload = json!({"artifact-reference": bad});
            assert!(resolve_references(&mut payload, &fixture.ctx()).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_multi_key_maps_are_not_references() {
        let fixture = Fixture::new();
        let original = json!({"job-reference": "<build>", "other": 1});
        let mut payload = original.clone();
        resolve_references(&mut payload, &fixture.ctx()).unwrap();
        assert_eq!(payload, original);
    }

    #[test]
    fn test_relative_datestamp() {
        let fixture = Fixture::new();
        let mut payload = json!({
            "deadline": {"relative-datestamp": "1 day"},
            "created": {"relative-datestamp": "-2 hours"},
        });
        resolve_references(&mut payload, &fixture.ctx()).unwrap();
        assert_eq!(payload["deadline"], "2024-01-02T00:00:00.000Z");
        assert_eq!(payload["created"], "2023-12-31T22:00:00.000Z");

        let mut bad = json!({"relative-datestamp": "soon"});
        assert!(resolve_references(&mut bad, &fixture.ctx()).is_err());
    }

    #[test]
    fn test_relative_datestamp_out_of_range() {
        let fixture = Fixture::new();
        for text in ["1000000 years", "-1000000 years"] {
            let mut payload = json!({"relative-datestamp": text});
            let err = resolve_references(&mut payload, &fixture.ctx()).unwrap_err();
            assert!(matches!(err, TaskgraphError::ReferenceResolution { .. }), "{text}");
        }
    }
}
