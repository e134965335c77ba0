//! Changed-file detection for `skip-unless-changed`.

use async_trait::async_trait;
use regex::Regex;
use taskgraph_core::Parameters;

/// The revision range a run was triggered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRange {
    /// Repository URL.
    pub repository: String,

    /// Version control system (`"git"` or `"hg"`).
    pub repository_type: String,

    /// First revision of the range (exclusive).
    pub base_rev: String,

    /// Last revision of the range (inclusive).
    pub head_rev: String,
}

impl RevisionRange {
    /// The revision range described by run parameters.
    pub fn from_parameters(params: &Parameters) -> Self {
        Self {
            repository: params.head_repository.clone(),
            repository_type: params.repository_type.clone(),
            base_rev: params.base_rev.clone(),
            head_rev: params.head_rev.clone(),
        }
    }
}

/// Backend answering whether files matching some patterns changed.
#[async_trait]
pub trait VcsDiff: Send + Sync {
    /// Whether any of `patterns` matches a path changed in `range`.
    async fn files_changed(&self, range: &RevisionRange, patterns: &[String]) -> anyhow::Result<bool>;
}

/// A path pattern.
///
/// `*` and `?` match within one path component, `**` matches any number of
/// components, and a pattern matching a directory matches everything below it.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&glob_to_regex(pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether `path` matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut rest = pattern.trim_end_matches('/');
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("**/") {
            regex.push_str("(?:.*/)?");
            rest = after;
        } else if let Some(after) = rest.strip_prefix("**") {
            regex.push_str(".*");
            rest = after;
        } else if let Some(after) = rest.strip_prefix('*') {
            regex.push_str("[^/]*");
            rest = after;
        } else if let Some(after) = rest.strip_prefix('?') {
            regex.push_str("[^/]");
            rest = after;
        } else {
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                regex.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
            }
            rest = chars.as_str();
        }
    }
    regex.push_str("(?:/.*)?$");
    regex
}

/// [`VcsDiff`] over a known list of changed paths.
///
/// Useful when the changed files were computed ahead of time (for example by
/// the decision job) and for tests.
#[derive(Debug, Clone, Default)]
pub struct ChangedFiles {
    files: Vec<String>,
}

impl ChangedFiles {
    /// Create a diff over `files`.
    pub fn new<S: Into<String>>(files: impl IntoIterator<Item = S>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    /// The changed paths.
    pub fn files(&self) -> &[String] {
        &self.files
    }
}

#[async_trait]
impl VcsDiff for ChangedFiles {
    async fn files_changed(&self, _range: &RevisionRange, patterns: &[String]) -> anyhow::Result<bool> {
        for pattern in patterns {
            let glob = GlobPattern::new(pattern)?;
            if self.files.iter().any(|f| glob.matches(f)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        GlobPattern::new(pattern).unwrap().matches(path)
    }

    #[test]
    fn test_single_star_stays_in_component() {
        assert!(matches("*", "foo"));
        assert!(matches("f*", "foo"));
        assert!(matches("fo*o", "foo"));
        assert!(matches("src/*.rs", "src/lib.rs"));
        assert!(!matches("src/*.rs", "src/graph/mod.rs"));
        assert!(!matches("foo/*/bar", "foo/bar"));
    }

    #[test]
    fn test_double_star_spans_directories() {
        assert!(matches("foo/**/bar", "foo/bar"));
        assert!(matches("foo/**/bar", "foo/a/b/bar"));
        assert!(matches("**/bar", "bar"));
        assert!(matches("**/bar", "x/y/bar"));
        assert!(matches("src/**", "src/a/b/c.rs"));
    }

    #[test]
    fn test_directory_matches_descendants() {
        assert!(matches("foo", "foo/bar"));
        assert!(matches("docs/", "docs/index.md"));
        assert!(!matches("foo", "foobar"));
    }

    #[test]
    fn test_special_characters_are_literal() {
        assert!(matches("a+b.txt", "a+b.txt"));
        assert!(!matches("a+b.txt", "aab.txt"));
        assert!(matches("file?.rs", "file1.rs"));
    }

    #[tokio::test]
    async fn test_changed_files() {
        let diff = ChangedFiles::new(["src/lib.rs", "README.md"]);
        let range = RevisionRange::from_parameters(&Parameters::default());

        let hit = diff
            .files_changed(&range, &["docs/**".to_string(), "src/**".to_string()])
            .await
            .unwrap();
        assert!(hit);

        let miss = diff.files_changed(&range, &["docs/**".to_string()]).await.unwrap();
        assert!(!miss);
    }
}
