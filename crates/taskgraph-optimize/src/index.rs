//! Index lookup: finding previously-computed jobs by key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use taskgraph_core::JobId;
use tokio::sync::RwLock;

/// Backend that maps index keys to the jobs that produced cached results.
#[async_trait]
pub trait IndexLookup: Send + Sync {
    /// Find the job indexed under `key`.
    ///
    /// `Ok(None)` is the only "not found" outcome; any error is reported as
    /// a strategy failure.
    async fn find_job(&self, key: &str) -> anyhow::Result<Option<JobId>>;
}

/// In-memory implementation of [`IndexLookup`].
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    /// Indexed entries: key -> job id.
    entries: Arc<RwLock<HashMap<String, JobId>>>,
}

impl InMemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index pre-populated with `entries`.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<JobId>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Index `job_id` under `key`, replacing any previous entry.
    pub async fn insert(&self, key: impl Into<String>, job_id: JobId) -> Option<JobId> {
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), job_id)
    }

    /// Remove the entry for `key`.
    pub async fn remove(&self, key: &str) -> Option<JobId> {
        let mut entries = self.entries.write().await;
        entries.remove(key)
    }

    /// Number of indexed keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl IndexLookup for InMemoryIndex {
    async fn find_job(&self, key: &str) -> anyhow::Result<Option<JobId>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_find() {
        let index = InMemoryIndex::new();
        index.insert("cache.build.linux", JobId::new("abc")).await;

        let found = index.find_job("cache.build.linux").await.unwrap();
        assert_eq!(found, Some(JobId::new("abc")));
        assert_eq!(index.find_job("cache.build.mac").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_and_remove() {
        let index = InMemoryIndex::from_entries([("k", "v1")]);
        let previous = index.insert("k", JobId::new("v2")).await;
        assert_eq!(previous, Some(JobId::new("v1")));
        assert_eq!(index.len().await, 1);

        index.remove("k").await;
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let index = InMemoryIndex::new();
        let clone = index.clone();
        clone.insert("shared", JobId::new("x")).await;
        assert_eq!(index.find_job("shared").await.unwrap(), Some(JobId::new("x")));
    }
}
