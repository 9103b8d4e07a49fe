use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use dataproof_analyzers::state::DataTypeClass;
use dataproof_analyzers::{Analyzer, Patterns};

use crate::constraint::{
    Assertion, Constraint, ConstraintResult, ConstraintStatus, MetricMap, Projection,
};

/// Severity a check escalates to when one of its constraints fails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CheckLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CheckStatus {
    Success,
    Warning,
    Error,
}

impl CheckStatus {
    pub fn label(self) -> &'static str {
        match self {
            CheckStatus::Success => "Success",
            CheckStatus::Warning => "Warning",
            CheckStatus::Error => "Error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub description: String,
    pub level: CheckLevel,
    pub status: CheckStatus,
    pub constraint_results: Vec<ConstraintResult>,
}

/// Leveled group of constraints built fluently.
///
/// ```
/// use dataproof_checks::{Assertion, Check, CheckLevel};
///
/// let check = Check::new(CheckLevel::Error, "orders")
///     .has_size(Assertion::AtLeast(1.0))
///     .is_complete("id")
///     .is_unique("id")
///     .is_contained_in("status", &["open", "closed"])
///     .where_filter("id > 0");
/// assert_eq!(check.constraints().len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct Check {
    level: CheckLevel,
    description: String,
    constraints: Vec<Constraint>,
    stop_on_failure: bool,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl Check {
    pub fn new(level: CheckLevel, description: impl Into<String>) -> Self {
        Self {
            level,
            description: description.into(),
            constraints: Vec::new(),
            stop_on_failure: false,
        }
    }

    pub fn level(&self) -> CheckLevel {
        self.level
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn add_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    fn assert_on(self, analyzer: Analyzer, assertion: Assertion) -> Self {
        self.add_constraint(Constraint::new(analyzer, assertion))
    }

    /// Attach a hint to the most recently added constraint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        if let Some(last) = self.constraints.pop() {
            self.constraints.push(last.with_hint(hint));
        }
        self
    }

    /// Evaluate the most recently added constraint on rows matching `filter` only.
    pub fn where_filter(mut self, filter: &str) -> Self {
        if let Some(last) = self.constraints.pop() {
            self.constraints.push(last.with_filter(filter));
        }
        self
    }

    /// Report constraints after the first failure as skipped.
    pub fn stop_on_failure(mut self) -> Self {
        self.stop_on_failure = true;
        self
    }

    pub fn has_size(self, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::size(), assertion)
    }

    pub fn is_complete(self, column: &str) -> Self {
        self.assert_on(Analyzer::completeness(column), Assertion::IsOne)
    }

    pub fn has_completeness(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::completeness(column), assertion)
    }

    pub fn is_unique(self, column: &str) -> Self {
        self.assert_on(Analyzer::uniqueness(&[column]), Assertion::IsOne)
    }

    /// Every key column complete and the combination unique.
    pub fn is_primary_key(self, columns: &[&str]) -> Self {
        let check = columns
            .iter()
            .fold(self, |check, column| check.is_complete(column));
        check.assert_on(Analyzer::uniqueness(columns), Assertion::IsOne)
    }

    pub fn has_uniqueness(self, columns: &[&str], assertion: Assertion) -> Self {
        self.assert_on(Analyzer::uniqueness(columns), assertion)
    }

    pub fn has_distinctness(self, columns: &[&str], assertion: Assertion) -> Self {
        self.assert_on(Analyzer::distinctness(columns), assertion)
    }

    pub fn has_unique_value_ratio(self, columns: &[&str], assertion: Assertion) -> Self {
        self.assert_on(Analyzer::unique_value_ratio(columns), assertion)
    }

    pub fn has_number_of_distinct_values(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::count_distinct(&[column]), assertion)
    }

    pub fn has_histogram_bin_ratio(self, column: &str, bin: &str, assertion: Assertion) -> Self {
        self.add_constraint(
            Constraint::new(Analyzer::histogram(column), assertion)
                .with_projection(Projection::BinRatio(bin.to_string())),
        )
    }

    pub fn has_entropy(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::entropy(column), assertion)
    }

    pub fn has_mutual_information(self, first: &str, second: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::mutual_information(first, second), assertion)
    }

    pub fn has_approx_quantile(self, column: &str, quantile: f64, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::approx_quantile(column, quantile), assertion)
    }

    pub fn has_approx_count_distinct(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::approx_count_distinct(column), assertion)
    }

    pub fn has_min(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::minimum(column), assertion)
    }

    pub fn has_max(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::maximum(column), assertion)
    }

    pub fn has_mean(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::mean(column), assertion)
    }

    pub fn has_sum(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::sum(column), assertion)
    }

    pub fn has_standard_deviation(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::standard_deviation(column), assertion)
    }

    pub fn has_min_length(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::min_length(column), assertion)
    }

    pub fn has_max_length(self, column: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::max_length(column), assertion)
    }

    pub fn has_correlation(self, first: &str, second: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::correlation(first, second), assertion)
    }

    /// Fraction of rows satisfying `predicate`.
    pub fn satisfies(self, predicate: &str, name: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::compliance(name, predicate), assertion)
    }

    pub fn has_pattern(self, column: &str, pattern: &str, assertion: Assertion) -> Self {
        self.assert_on(Analyzer::pattern_match(column, pattern), assertion)
    }

    pub fn contains_email(self, column: &str, assertion: Assertion) -> Self {
        self.has_pattern(column, Patterns::EMAIL, assertion)
    }

    pub fn contains_url(self, column: &str, assertion: Assertion) -> Self {
        self.has_pattern(column, Patterns::URL, assertion)
    }

    pub fn is_non_negative(self, column: &str) -> Self {
        let predicate = format!("{column} IS NULL OR {column} >= 0");
        self.satisfies(&predicate, &format!("{column} is non-negative"), Assertion::IsOne)
    }

    pub fn is_positive(self, column: &str) -> Self {
        let predicate = format!("{column} IS NULL OR {column} > 0");
        self.satisfies(&predicate, &format!("{column} is positive"), Assertion::IsOne)
    }

    /// Every non-null value is one of `allowed`.
    pub fn is_contained_in(self, column: &str, allowed: &[&str]) -> Self {
        let list = allowed
            .iter()
            .map(|value| quote(value))
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = format!("{column} IS NULL OR {column} IN ({list})");
        self.satisfies(
            &predicate,
            &format!("{column} contained in {}", allowed.join(",")),
            Assertion::IsOne,
        )
    }

    /// Every non-null value lies in `[lower, upper]`.
    pub fn is_contained_in_range(self, column: &str, lower: f64, upper: f64) -> Self {
        let predicate = format!("{column} IS NULL OR {column} BETWEEN {lower} AND {upper}");
        self.satisfies(
            &predicate,
            &format!("{column} between {lower} and {upper}"),
            Assertion::IsOne,
        )
    }

    /// Asserts on the share of cells whose inferred type is `data_type`.
    pub fn has_data_type(self, column: &str, data_type: DataTypeClass, assertion: Assertion) -> Self {
        self.add_constraint(
            Constraint::new(Analyzer::data_type(column), assertion)
                .with_projection(Projection::BinRatio(data_type.label().to_string())),
        )
    }

    /// Every analyzer any constraint depends on, without duplicates.
    pub fn required_analyzers(&self) -> Vec<Analyzer> {
        let mut analyzers: Vec<Analyzer> = self
            .constraints
            .iter()
            .flat_map(|constraint| constraint.analyzers.iter().cloned())
            .collect();
        analyzers.sort();
        analyzers.dedup();
        analyzers
    }

    pub fn evaluate(&self, metrics: &MetricMap) -> CheckResult {
        let mut failed = false;
        let mut constraint_results = Vec::with_capacity(self.constraints.len());
        for constraint in &self.constraints {
            if self.stop_on_failure && failed {
                constraint_results.push(ConstraintResult {
                    constraint: constraint.description(),
                    status: ConstraintStatus::Skipped,
                    message: Some("skipped after an earlier failure".to_string()),
                    metric_value: None,
                });
                continue;
            }
            let result = constraint.evaluate(metrics);
            failed |= result.status == ConstraintStatus::Failure;
            constraint_results.push(result);
        }

        let status = match (failed, self.level) {
            (false, _) => CheckStatus::Success,
            (true, CheckLevel::Warning) => CheckStatus::Warning,
            (true, CheckLevel::Error) => CheckStatus::Error,
        };
        CheckResult {
            description: self.description.clone(),
            level: self.level,
            status,
            constraint_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataproof_analyzers::state::RatioState;
    use dataproof_analyzers::{Entity, Metric, MetricFailure, MetricValue, State};

    fn metric_map(entries: Vec<(Analyzer, Result<MetricValue, MetricFailure>)>) -> MetricMap {
        entries
            .into_iter()
            .map(|(analyzer, value)| {
                let metric = Metric {
                    entity: Entity::Column,
                    instance: analyzer.instance(),
                    name: analyzer.name(),
                    value,
                };
                (analyzer, metric)
            })
            .collect()
    }

    #[test]
    fn empty_check_succeeds() {
        let result = Check::new(CheckLevel::Error, "nothing").evaluate(&MetricMap::new());
        assert_eq!(result.status, CheckStatus::Success);
        assert!(result.constraint_results.is_empty());
    }

    #[test]
    fn warning_level_caps_status() {
        let metrics = metric_map(vec![(Analyzer::size(), Ok(MetricValue::Long(2)))]);
        let result = Check::new(CheckLevel::Warning, "size")
            .has_size(Assertion::AtLeast(3.0))
            .evaluate(&metrics);
        assert_eq!(result.status, CheckStatus::Warning);
    }

    #[test]
    fn skipped_constraints_do_not_escalate() {
        let metrics = metric_map(vec![(
            Analyzer::completeness("id"),
            Err(MetricFailure::analysis("boom")),
        )]);
        let result = Check::new(CheckLevel::Error, "ids")
            .is_complete("id")
            .evaluate(&metrics);
        assert_eq!(result.status, CheckStatus::Success);
        assert_eq!(result.constraint_results[0].status, ConstraintStatus::Skipped);
    }

    #[test]
    fn constraints_are_evaluated_independently() {
        let metrics = metric_map(vec![
            (Analyzer::size(), Ok(MetricValue::Long(5))),
            (Analyzer::completeness("id"), Ok(MetricValue::Double(1.0))),
        ]);
        let check = Check::new(CheckLevel::Error, "ids")
            .has_size(Assertion::Equals(10.0))
            .is_complete("id");
        let statuses: Vec<_> = check
            .evaluate(&metrics)
            .constraint_results
            .iter()
            .map(|result| result.status)
            .collect();
        assert_eq!(statuses, vec![ConstraintStatus::Failure, ConstraintStatus::Success]);

        let statuses: Vec<_> = check
            .stop_on_failure()
            .evaluate(&metrics)
            .constraint_results
            .iter()
            .map(|result| result.status)
            .collect();
        assert_eq!(statuses, vec![ConstraintStatus::Failure, ConstraintStatus::Skipped]);
    }

    #[test]
    fn where_filter_retargets_the_last_constraint_only() {
        let check = Check::new(CheckLevel::Error, "filtered")
            .is_complete("id")
            .has_mean("amount", Assertion::AtLeast(0.0))
            .where_filter("country = 'BR'");
        let analyzers = check.required_analyzers();
        assert!(analyzers.contains(&Analyzer::completeness("id")));
        assert!(analyzers.contains(&Analyzer::mean("amount").with_filter("country = 'BR'")));
    }

    #[test]
    fn primary_key_requires_completeness_and_uniqueness() {
        let check = Check::new(CheckLevel::Error, "pk").is_primary_key(&["a", "b"]);
        assert_eq!(
            check.required_analyzers(),
            vec![
                Analyzer::completeness("a"),
                Analyzer::completeness("b"),
                Analyzer::uniqueness(&["a", "b"]),
            ]
        );
    }

    #[test]
    fn containment_quotes_values() {
        let check = Check::new(CheckLevel::Error, "status").is_contained_in("status", &["o'k", "no"]);
        let analyzers = check.required_analyzers();
        match &analyzers[0] {
            Analyzer::Compliance { predicate, .. } => {
                assert_eq!(predicate, "status IS NULL OR status IN ('o''k', 'no')");
            }
            other => panic!("unexpected analyzer {other:?}"),
        }
    }

    #[test]
    fn one_bad_row_in_ten_billion_still_fails_built_in_checks() {
        let completeness = Analyzer::completeness("id");
        let state = State::Ratio(RatioState {
            matches: 9_999_999_999,
            total: 10_000_000_000,
        });
        let mut metrics: MetricMap = [(completeness.clone(), completeness.compute_metric(&state))]
            .into_iter()
            .collect();
        let result = Check::new(CheckLevel::Error, "ids")
            .is_complete("id")
            .evaluate(&metrics);
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.constraint_results[0].status, ConstraintStatus::Failure);

        let nearly_one = 1.0 - 1e-10;
        metrics.extend(metric_map(vec![
            (Analyzer::uniqueness(&["id"]), Ok(MetricValue::Double(nearly_one))),
            (
                Analyzer::compliance("id is non-negative", "id IS NULL OR id >= 0"),
                Ok(MetricValue::Double(nearly_one)),
            ),
        ]));
        let result = Check::new(CheckLevel::Error, "ids")
            .is_unique("id")
            .is_non_negative("id")
            .evaluate(&metrics);
        let statuses: Vec<_> = result
            .constraint_results
            .iter()
            .map(|constraint| constraint.status)
            .collect();
        assert_eq!(statuses, vec![ConstraintStatus::Failure; 2]);

        let relaxed = Check::new(CheckLevel::Error, "ids")
            .has_completeness("id", Assertion::Equals(1.0))
            .evaluate(&metrics);
        assert_eq!(relaxed.status, CheckStatus::Success);
    }
}
