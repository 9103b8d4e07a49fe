//! Persistence of metrics and states under a [`ResultKey`].

pub mod fs;
pub mod memory;

pub use fs::FileSystemRepository;
pub use memory::InMemoryRepository;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::Analyzer;
use crate::descriptor::Descriptor;
use crate::metric::Metric;
use crate::records;
use crate::state::State;

/// Version written into every persisted entry.
pub const REPOSITORY_FORMAT_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported format version '{version}' in {path}")]
    UnsupportedFormat { path: PathBuf, version: String },
    #[error("repository lock poisoned")]
    Poisoned,
    #[error("invalid repository: {0}")]
    Invalid(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Identifies one run: a dataset date in epoch milliseconds plus tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub dataset_date: i64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ResultKey {
    pub fn new(dataset_date: i64) -> Self {
        Self {
            dataset_date,
            tags: BTreeMap::new(),
        }
    }

    pub fn at(date: DateTime<Utc>) -> Self {
        Self::new(date.timestamp_millis())
    }

    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.dataset_date).single()
    }

    /// Whether every tag in `tags` is present with the same value.
    pub fn has_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date() {
            Some(date) => write!(f, "{}", date.to_rfc3339())?,
            None => write!(f, "{}", self.dataset_date)?,
        }
        for (key, value) in &self.tags {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Everything stored under one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub key: ResultKey,
    #[serde(default, with = "records::metrics")]
    pub metrics: BTreeMap<Analyzer, Metric>,
    #[serde(default, with = "records::states")]
    pub states: BTreeMap<Descriptor, State>,
}

impl RepositoryEntry {
    pub fn new(key: ResultKey) -> Self {
        Self {
            key,
            metrics: BTreeMap::new(),
            states: BTreeMap::new(),
        }
    }

    /// Entries from `newer` replace same-keyed entries of `self`.
    pub fn append(mut self, newer: RepositoryEntry) -> Self {
        self.metrics.extend(newer.metrics);
        self.states.extend(newer.states);
        self
    }

    pub fn successful_metric(&self, analyzer: &Analyzer) -> Option<&Metric> {
        self.metrics.get(analyzer).filter(|metric| metric.is_success())
    }
}

/// Filter for [`MetricsRepository::load_range`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeQuery {
    /// Inclusive lower bound on the dataset date.
    pub after: Option<i64>,
    /// Inclusive upper bound on the dataset date.
    pub before: Option<i64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Keep only these analyzers' metrics.
    pub analyzers: Option<BTreeSet<Analyzer>>,
}

impl RangeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn after(mut self, dataset_date: i64) -> Self {
        self.after = Some(dataset_date);
        self
    }

    pub fn before(mut self, dataset_date: i64) -> Self {
        self.before = Some(dataset_date);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn for_analyzers(mut self, analyzers: impl IntoIterator<Item = Analyzer>) -> Self {
        self.analyzers = Some(analyzers.into_iter().collect());
        self
    }

    pub fn matches(&self, key: &ResultKey) -> bool {
        self.after.is_none_or(|after| key.dataset_date >= after)
            && self.before.is_none_or(|before| key.dataset_date <= before)
            && key.has_tags(&self.tags)
    }

    /// Drop metrics outside the analyzer selection.
    pub fn project(&self, mut entry: RepositoryEntry) -> RepositoryEntry {
        if let Some(analyzers) = &self.analyzers {
            entry.metrics.retain(|analyzer, _| analyzers.contains(analyzer));
        }
        entry
    }
}

/// Storage for run results.
///
/// `save` replaces whatever is stored under the entry's key; readers never
/// observe a partially written entry.
pub trait MetricsRepository: Send + Sync {
    fn save(&self, entry: &RepositoryEntry) -> RepositoryResult<()>;

    fn load(&self, key: &ResultKey) -> RepositoryResult<Option<RepositoryEntry>>;

    /// Matching entries in ascending dataset-date order.
    fn load_range(&self, query: &RangeQuery) -> RepositoryResult<Vec<RepositoryEntry>>;
}

pub(crate) fn sort_entries(entries: &mut [RepositoryEntry]) {
    entries.sort_by(|a, b| a.key.cmp(&b.key));
}
