use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dataproof_analyzers::{
    AnalysisOptions, AnalysisRunner, Analyzer, AnalyzerContext, ExecutionEngine, MetricRow,
    MetricsRepository, ResultKey,
};
use dataproof_core::Schema;

use crate::check::{Check, CheckLevel, CheckResult, CheckStatus};
use crate::constraint::ConstraintStatus;
use crate::error::VerificationError;

/// Linear stages of one verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    Init,
    DeriveAnalyzers,
    RunAnalysis,
    EvaluateConstraints,
    AssembleReport,
    Done,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VerificationStage::Init => "init",
            VerificationStage::DeriveAnalyzers => "derive_analyzers",
            VerificationStage::RunAnalysis => "run_analysis",
            VerificationStage::EvaluateConstraints => "evaluate_constraints",
            VerificationStage::AssembleReport => "assemble_report",
            VerificationStage::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationOptions {
    /// Computed and reported even when no constraint depends on them.
    #[serde(default)]
    pub required_analyzers: Vec<Analyzer>,
    #[serde(default)]
    pub aggregate_with: Vec<ResultKey>,
    pub save_states_with: Option<ResultKey>,
    pub save_or_append_results_with: Option<ResultKey>,
    pub reuse_results_for: Option<ResultKey>,
    #[serde(default)]
    pub fail_if_results_missing: bool,
    #[serde(default)]
    pub force_fresh: BTreeSet<Analyzer>,
}

impl VerificationOptions {
    fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            aggregate_with: self.aggregate_with.clone(),
            save_states_with: self.save_states_with.clone(),
            save_or_append_results_with: self.save_or_append_results_with.clone(),
            reuse_results_for: self.reuse_results_for.clone(),
            fail_if_results_missing: self.fail_if_results_missing,
            force_fresh: self.force_fresh.clone(),
        }
    }
}

/// Flat view of one constraint outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResultRow {
    pub check: String,
    pub check_level: CheckLevel,
    pub check_status: CheckStatus,
    pub constraint: String,
    pub constraint_status: ConstraintStatus,
    pub constraint_message: Option<String>,
}

/// Outcome of a verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: CheckStatus,
    pub check_results: Vec<CheckResult>,
    pub metrics: AnalyzerContext,
}

impl VerificationResult {
    pub fn check_result_rows(&self) -> Vec<CheckResultRow> {
        self.check_results
            .iter()
            .flat_map(|check| {
                check
                    .constraint_results
                    .iter()
                    .map(move |constraint| CheckResultRow {
                        check: check.description.clone(),
                        check_level: check.level,
                        check_status: check.status,
                        constraint: constraint.constraint.clone(),
                        constraint_status: constraint.status,
                        constraint_message: constraint.message.clone(),
                    })
            })
            .collect()
    }

    pub fn metric_rows(&self) -> Vec<MetricRow> {
        self.metrics.metric_rows()
    }
}

fn enter(stage: VerificationStage) {
    info!(stage = %stage, "verification stage");
}

/// Derives analyzers from checks, computes them and evaluates every check.
pub struct VerificationSuite<'a, E> {
    engine: &'a E,
    repository: Option<&'a dyn MetricsRepository>,
    options: VerificationOptions,
}

impl<'a, E: ExecutionEngine> VerificationSuite<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self {
            engine,
            repository: None,
            options: VerificationOptions::default(),
        }
    }

    pub fn with_repository(mut self, repository: &'a dyn MetricsRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_options(mut self, options: VerificationOptions) -> Self {
        self.options = options;
        self
    }

    fn runner(&self) -> AnalysisRunner<'a> {
        let runner = AnalysisRunner::new(self.options.analysis_options());
        match self.repository {
            Some(repository) => runner.with_repository(repository),
            None => runner,
        }
    }

    pub fn run(
        &self,
        dataset: &E::Data,
        checks: &[Check],
    ) -> Result<VerificationResult, VerificationError> {
        let start = Instant::now();
        enter(VerificationStage::Init);
        enter(VerificationStage::DeriveAnalyzers);
        let analyzers = derive_analyzers(checks, &self.options.required_analyzers)?;
        info!(checks = checks.len(), analyzers = analyzers.len(), "analyzers derived");

        enter(VerificationStage::RunAnalysis);
        let context = self.runner().run(self.engine, dataset, &analyzers)?;
        let result = evaluate(checks, context)?;
        info!(
            status = result.status.label(),
            duration_ms = start.elapsed().as_millis() as u64,
            "verification finished"
        );
        Ok(result)
    }

    /// Verify checks against states stored under `keys`, without scanning.
    pub fn run_on_aggregated_states(
        &self,
        schema: &Schema,
        checks: &[Check],
        keys: &[ResultKey],
    ) -> Result<VerificationResult, VerificationError> {
        enter(VerificationStage::Init);
        enter(VerificationStage::DeriveAnalyzers);
        let analyzers = derive_analyzers(checks, &self.options.required_analyzers)?;

        enter(VerificationStage::RunAnalysis);
        let context = self
            .runner()
            .run_on_aggregated_states(schema, &analyzers, keys)?;
        evaluate(checks, context)
    }
}

/// Union of all constraint dependencies and extra analyzers, deduplicated.
pub fn derive_analyzers(
    checks: &[Check],
    required: &[Analyzer],
) -> Result<Vec<Analyzer>, VerificationError> {
    let mut analyzers: BTreeSet<Analyzer> = required.iter().cloned().collect();
    for check in checks {
        for constraint in check.constraints() {
            if constraint.analyzers.is_empty() {
                return Err(VerificationError::InvalidCheck {
                    check: check.description().to_string(),
                    message: format!("constraint '{}' depends on no analyzer", constraint.name()),
                });
            }
            analyzers.extend(constraint.analyzers.iter().cloned());
        }
    }
    Ok(analyzers.into_iter().collect())
}

/// Evaluate checks against already computed metrics and assemble the result.
///
/// Every dependency must be present in `context`; a missing one means the
/// metrics were computed for a different set of checks.
pub fn evaluate(
    checks: &[Check],
    context: AnalyzerContext,
) -> Result<VerificationResult, VerificationError> {
    enter(VerificationStage::EvaluateConstraints);
    for check in checks {
        for constraint in check.constraints() {
            if constraint.analyzers.is_empty() {
                return Err(VerificationError::InvalidCheck {
                    check: check.description().to_string(),
                    message: format!("constraint '{}' depends on no analyzer", constraint.name()),
                });
            }
            if let Some(missing) = constraint
                .analyzers
                .iter()
                .find(|analyzer| context.metric(analyzer).is_none())
            {
                return Err(VerificationError::InvalidCheck {
                    check: check.description().to_string(),
                    message: format!("analyzer {missing} was never computed"),
                });
            }
        }
    }

    let check_results: Vec<CheckResult> = checks
        .iter()
        .map(|check| {
            let result = check.evaluate(context.metrics());
            debug!(check = %result.description, status = result.status.label(), "check evaluated");
            result
        })
        .collect();

    enter(VerificationStage::AssembleReport);
    let status = check_results
        .iter()
        .map(|result| result.status)
        .max()
        .unwrap_or(CheckStatus::Success);
    enter(VerificationStage::Done);
    Ok(VerificationResult {
        status,
        check_results,
        metrics: context,
    })
}
