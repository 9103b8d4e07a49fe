use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{
    MetricsRepository, RangeQuery, RepositoryEntry, RepositoryError, RepositoryResult, ResultKey,
};

/// Process-local repository, mostly for tests and single runs.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    entries: RwLock<BTreeMap<ResultKey, RepositoryEntry>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MetricsRepository for InMemoryRepository {
    fn save(&self, entry: &RepositoryEntry) -> RepositoryResult<()> {
        let mut entries = self.entries.write().map_err(|_| RepositoryError::Poisoned)?;
        entries.insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn load(&self, key: &ResultKey) -> RepositoryResult<Option<RepositoryEntry>> {
        let entries = self.entries.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn load_range(&self, query: &RangeQuery) -> RepositoryResult<Vec<RepositoryEntry>> {
        let entries = self.entries.read().map_err(|_| RepositoryError::Poisoned)?;
        // BTreeMap order already sorts by dataset date first.
        Ok(entries
            .values()
            .filter(|entry| query.matches(&entry.key))
            .map(|entry| query.project(entry.clone()))
            .collect())
    }
}
