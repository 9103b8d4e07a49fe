use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use dataproof_core::{Dataset, Schema};

use crate::analyzer::Analyzer;
use crate::descriptor::{Descriptor, ScanShape};
use crate::engine::{ExecutionEngine, ScanRequest};
use crate::metric::{Metric, MetricFailure, MetricRow};
use crate::records;
use crate::repository::{MetricsRepository, RepositoryEntry, RepositoryError, ResultKey};
use crate::state::State;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("{0} requires a metrics repository")]
    RepositoryRequired(&'static str),
    #[error("no stored results under key {key} for {missing} analyzer(s)")]
    MissingResults { key: String, missing: usize },
}

/// Repository interaction for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Stored states under these keys are merged into fresh states.
    #[serde(default)]
    pub aggregate_with: Vec<ResultKey>,
    /// Persist the final states under this key.
    pub save_states_with: Option<ResultKey>,
    /// Persist metrics under this key, merging with what is already there.
    pub save_or_append_results_with: Option<ResultKey>,
    /// Take successful metrics stored under this key instead of scanning.
    pub reuse_results_for: Option<ResultKey>,
    /// Fail when `reuse_results_for` misses any requested analyzer.
    #[serde(default)]
    pub fail_if_results_missing: bool,
    /// Analyzers reported from fresh data only, ignoring `aggregate_with`.
    #[serde(default)]
    pub force_fresh: BTreeSet<Analyzer>,
}

impl AnalysisOptions {
    fn uses_repository(&self) -> Option<&'static str> {
        if !self.aggregate_with.is_empty() {
            Some("aggregate_with")
        } else if self.save_states_with.is_some() {
            Some("save_states_with")
        } else if self.save_or_append_results_with.is_some() {
            Some("save_or_append_results_with")
        } else if self.reuse_results_for.is_some() {
            Some("reuse_results_for")
        } else {
            None
        }
    }
}

/// Metrics of one run keyed by analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerContext {
    #[serde(with = "records::metrics")]
    metrics: BTreeMap<Analyzer, Metric>,
}

impl AnalyzerContext {
    pub fn new(metrics: BTreeMap<Analyzer, Metric>) -> Self {
        Self { metrics }
    }

    pub fn metric(&self, analyzer: &Analyzer) -> Option<&Metric> {
        self.metrics.get(analyzer)
    }

    pub fn metrics(&self) -> &BTreeMap<Analyzer, Metric> {
        &self.metrics
    }

    pub fn into_metrics(self) -> BTreeMap<Analyzer, Metric> {
        self.metrics
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Union of two contexts; `other` wins on shared analyzers.
    pub fn merge(mut self, other: AnalyzerContext) -> Self {
        self.metrics.extend(other.metrics);
        self
    }

    /// Successful metrics flattened into scalar rows.
    pub fn metric_rows(&self) -> Vec<MetricRow> {
        self.metrics.values().flat_map(Metric::rows).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Analyzer, &MetricFailure)> {
        self.metrics
            .iter()
            .filter_map(|(analyzer, metric)| metric.failure().map(|failure| (analyzer, failure)))
    }
}

/// Computes analyzers with as few scans as possible.
///
/// Analyzers are deduplicated, descriptors shared between analyzers are
/// computed once, and descriptors with the same scan shape share one pass
/// over the data. Per-analyzer problems become failed metrics; only
/// repository problems fail the run.
pub struct AnalysisRunner<'a> {
    options: AnalysisOptions,
    repository: Option<&'a dyn MetricsRepository>,
}

impl<'a> AnalysisRunner<'a> {
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            options,
            repository: None,
        }
    }

    pub fn with_repository(mut self, repository: &'a dyn MetricsRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    fn repository(&self, purpose: &'static str) -> Result<&'a dyn MetricsRepository, RunnerError> {
        self.repository
            .ok_or(RunnerError::RepositoryRequired(purpose))
    }

    pub fn run<E: ExecutionEngine>(
        &self,
        engine: &E,
        dataset: &E::Data,
        analyzers: &[Analyzer],
    ) -> Result<AnalyzerContext, RunnerError> {
        let start = Instant::now();
        if let Some(purpose) = self.options.uses_repository() {
            self.repository(purpose)?;
        }

        let requested: BTreeSet<Analyzer> = analyzers.iter().cloned().collect();
        let mut metrics: BTreeMap<Analyzer, Metric> = BTreeMap::new();
        let pending = self.reuse_stored_results(&requested, &mut metrics)?;
        let reused = metrics.len();

        let schema = dataset.schema();
        let mut runnable = Vec::new();
        for analyzer in pending {
            let problems = analyzer.preconditions(schema);
            if problems.is_empty() {
                runnable.push(analyzer);
            } else {
                debug!(analyzer = %analyzer, problems = ?problems, "precondition failed");
                let failure = MetricFailure::precondition(problems.join("; "));
                metrics.insert(analyzer.clone(), analyzer.failed(failure));
            }
        }

        let mut by_descriptor: BTreeMap<Descriptor, Vec<Analyzer>> = BTreeMap::new();
        for analyzer in runnable {
            by_descriptor
                .entry(analyzer.descriptor())
                .or_default()
                .push(analyzer);
        }
        let mut by_shape: BTreeMap<ScanShape, Vec<Descriptor>> = BTreeMap::new();
        for descriptor in by_descriptor.keys() {
            by_shape
                .entry(descriptor.shape())
                .or_default()
                .push(descriptor.clone());
        }

        let prior = self.load_prior_states(by_descriptor.keys())?;

        info!(
            analyzers = requested.len(),
            reused,
            descriptors = by_descriptor.len(),
            scans = by_shape.len(),
            aggregate_with = self.options.aggregate_with.len(),
            "analysis started"
        );

        let groups: Vec<(ScanShape, Vec<Descriptor>)> = by_shape.into_iter().collect();
        let outcomes: Vec<(Descriptor, Result<State, String>)> = groups
            .into_par_iter()
            .flat_map_iter(|(shape, descriptors)| {
                let states = match scan_group(engine, dataset, &shape, &descriptors) {
                    Ok(states) => states,
                    Err(message) => vec![Err(message); descriptors.len()],
                };
                descriptors.into_iter().zip(states)
            })
            .collect();

        let mut final_states: BTreeMap<Descriptor, State> = BTreeMap::new();
        for (descriptor, outcome) in outcomes {
            let dependents = by_descriptor.get(&descriptor).cloned().unwrap_or_default();
            let fresh = match outcome {
                Ok(fresh) => fresh,
                Err(message) => {
                    warn!(descriptor = %descriptor, error = %message, "scan failed");
                    for analyzer in &dependents {
                        let failure = MetricFailure::analysis(message.clone());
                        metrics.insert(analyzer.clone(), analyzer.failed(failure));
                    }
                    continue;
                }
            };

            let stored = prior.get(&descriptor).map(Vec::as_slice).unwrap_or(&[]);
            let aggregated = State::merge_all(fresh.clone(), stored);
            for analyzer in &dependents {
                let metric = if self.options.force_fresh.contains(analyzer) {
                    analyzer.compute_metric(&fresh)
                } else {
                    match &aggregated {
                        Ok(state) => analyzer.compute_metric(state),
                        Err(err) => analyzer.failed(MetricFailure::analysis(err.to_string())),
                    }
                };
                metrics.insert(analyzer.clone(), metric);
            }
            let all_fresh = dependents
                .iter()
                .all(|analyzer| self.options.force_fresh.contains(analyzer));
            match aggregated {
                Ok(state) if !all_fresh => {
                    final_states.insert(descriptor, state);
                }
                _ => {
                    final_states.insert(descriptor, fresh);
                }
            }
        }

        self.persist(&metrics, final_states)?;

        let failed = metrics.values().filter(|metric| !metric.is_success()).count();
        info!(
            metrics = metrics.len(),
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "analysis finished"
        );
        Ok(AnalyzerContext::new(metrics))
    }

    /// Compute metrics purely from stored states, without scanning data.
    pub fn run_on_aggregated_states(
        &self,
        schema: &Schema,
        analyzers: &[Analyzer],
        keys: &[ResultKey],
    ) -> Result<AnalyzerContext, RunnerError> {
        let repository = self.repository("run_on_aggregated_states")?;
        let mut stored: BTreeMap<Descriptor, Vec<State>> = BTreeMap::new();
        for key in keys {
            match repository.load(key)? {
                Some(entry) => {
                    for (descriptor, state) in entry.states {
                        stored.entry(descriptor).or_default().push(state);
                    }
                }
                None => warn!(key = %key, "no stored states for key"),
            }
        }

        let mut metrics = BTreeMap::new();
        let mut final_states = BTreeMap::new();
        for analyzer in analyzers.iter().collect::<BTreeSet<_>>() {
            let problems = analyzer.preconditions(schema);
            let metric = if !problems.is_empty() {
                analyzer.failed(MetricFailure::precondition(problems.join("; ")))
            } else {
                let descriptor = analyzer.descriptor();
                match stored.get(&descriptor) {
                    None => analyzer.failed(MetricFailure::insufficient(format!(
                        "no stored state for {descriptor}"
                    ))),
                    Some(states) => {
                        let identity = State::empty(&descriptor.computation);
                        match State::merge_all(identity, states) {
                            Ok(state) => {
                                let metric = analyzer.compute_metric(&state);
                                final_states.insert(descriptor, state);
                                metric
                            }
                            Err(err) => analyzer.failed(MetricFailure::analysis(err.to_string())),
                        }
                    }
                }
            };
            metrics.insert(analyzer.clone(), metric);
        }

        info!(
            analyzers = metrics.len(),
            keys = keys.len(),
            "metrics computed from stored states"
        );
        self.persist(&metrics, final_states)?;
        Ok(AnalyzerContext::new(metrics))
    }

    fn reuse_stored_results(
        &self,
        requested: &BTreeSet<Analyzer>,
        metrics: &mut BTreeMap<Analyzer, Metric>,
    ) -> Result<Vec<Analyzer>, RunnerError> {
        let Some(key) = &self.options.reuse_results_for else {
            return Ok(requested.iter().cloned().collect());
        };
        let repository = self.repository("reuse_results_for")?;
        let entry = repository.load(key)?;

        let mut pending = Vec::new();
        for analyzer in requested {
            match entry.as_ref().and_then(|entry| entry.successful_metric(analyzer)) {
                Some(metric) => {
                    metrics.insert(analyzer.clone(), metric.clone());
                }
                None => pending.push(analyzer.clone()),
            }
        }
        if self.options.fail_if_results_missing && !pending.is_empty() {
            return Err(RunnerError::MissingResults {
                key: key.to_string(),
                missing: pending.len(),
            });
        }
        Ok(pending)
    }

    fn load_prior_states<'d>(
        &self,
        descriptors: impl Iterator<Item = &'d Descriptor>,
    ) -> Result<BTreeMap<Descriptor, Vec<State>>, RunnerError> {
        let mut prior: BTreeMap<Descriptor, Vec<State>> = BTreeMap::new();
        if self.options.aggregate_with.is_empty() {
            return Ok(prior);
        }
        let repository = self.repository("aggregate_with")?;
        let entries = self
            .options
            .aggregate_with
            .iter()
            .map(|key| repository.load(key).map(|entry| (key, entry)))
            .collect::<Result<Vec<_>, _>>()?;

        for descriptor in descriptors {
            for (key, entry) in &entries {
                match entry.as_ref().and_then(|entry| entry.states.get(descriptor)) {
                    Some(state) => prior
                        .entry(descriptor.clone())
                        .or_default()
                        .push(state.clone()),
                    None => warn!(
                        key = %key,
                        descriptor = %descriptor,
                        "no stored state to aggregate with"
                    ),
                }
            }
        }
        Ok(prior)
    }

    fn persist(
        &self,
        metrics: &BTreeMap<Analyzer, Metric>,
        states: BTreeMap<Descriptor, State>,
    ) -> Result<(), RunnerError> {
        let mut updates: BTreeMap<ResultKey, RepositoryEntry> = BTreeMap::new();
        if let Some(key) = &self.options.save_states_with {
            updates
                .entry(key.clone())
                .or_insert_with(|| RepositoryEntry::new(key.clone()))
                .states
                .extend(states);
        }
        if let Some(key) = &self.options.save_or_append_results_with {
            updates
                .entry(key.clone())
                .or_insert_with(|| RepositoryEntry::new(key.clone()))
                .metrics
                .extend(metrics.iter().map(|(a, m)| (a.clone(), m.clone())));
        }
        if updates.is_empty() {
            return Ok(());
        }

        let repository = self.repository("saving results")?;
        for (key, update) in updates {
            let entry = match repository.load(&key)? {
                Some(existing) => existing.append(update),
                None => update,
            };
            repository.save(&entry)?;
            info!(
                key = %key,
                metrics = entry.metrics.len(),
                states = entry.states.len(),
                "results saved"
            );
        }
        Ok(())
    }
}

/// Scan one shape and merge each descriptor's partitions. The outer error
/// fails the whole group; inner errors belong to single descriptors.
fn scan_group<E: ExecutionEngine>(
    engine: &E,
    dataset: &E::Data,
    shape: &ScanShape,
    descriptors: &[Descriptor],
) -> Result<Vec<Result<State, String>>, String> {
    let request = ScanRequest { shape, descriptors };
    let scans = engine
        .scan_partitions(dataset, &request)
        .map_err(|err| err.to_string())?;
    if scans.len() != descriptors.len() {
        return Err(format!(
            "engine returned {} result(s) for {} descriptor(s)",
            scans.len(),
            descriptors.len()
        ));
    }

    let merged = descriptors
        .iter()
        .zip(scans)
        .map(|(descriptor, scan)| {
            let partitions = scan.map_err(|err| err.to_string())?;
            State::merge_all(State::empty(&descriptor.computation), &partitions)
                .map_err(|err| err.to_string())
        })
        .collect();
    debug!(shape = %shape, descriptors = descriptors.len(), "scan merged");
    Ok(merged)
}
