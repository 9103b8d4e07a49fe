use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use dataproof_analyzers::{Analyzer, Metric, MetricValue};

/// Metrics available to constraints, keyed by the analyzer that produced them.
pub type MetricMap = BTreeMap<Analyzer, Metric>;

const EQUALS_TOLERANCE: f64 = 1e-9;

/// Which number of the first dependency metric is asserted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// The metric's scalar value.
    Value,
    /// Number of bins of a distribution.
    BinCount,
    /// Ratio of one distribution bin, zero when the bin is absent.
    BinRatio(String),
}

impl Projection {
    fn apply(&self, value: &MetricValue) -> Option<f64> {
        match self {
            Projection::Value => value.as_f64(),
            Projection::BinCount => value
                .as_distribution()
                .map(|distribution| distribution.number_of_bins as f64),
            Projection::BinRatio(bin) => value
                .as_distribution()
                .map(|distribution| distribution.ratio_of(bin)),
        }
    }
}

type CustomPredicate = Arc<dyn Fn(f64) -> bool + Send + Sync>;

/// Condition a projected metric value must satisfy.
#[derive(Clone)]
pub enum Assertion {
    /// Equal up to rounding noise of 1e-9.
    Equals(f64),
    /// Exactly one; used for ratios that must hold on every row.
    IsOne,
    AtLeast(f64),
    AtMost(f64),
    GreaterThan(f64),
    LessThan(f64),
    Between { min: f64, max: f64 },
    Custom {
        description: String,
        predicate: CustomPredicate,
    },
}

impl Assertion {
    pub fn custom(
        description: impl Into<String>,
        predicate: impl Fn(f64) -> bool + Send + Sync + 'static,
    ) -> Self {
        Assertion::Custom {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// `Err` carries the panic message of a custom predicate.
    pub fn check(&self, value: f64) -> Result<bool, String> {
        let holds = match self {
            Assertion::Equals(expected) => (value - expected).abs() <= EQUALS_TOLERANCE,
            Assertion::IsOne => value == 1.0,
            Assertion::AtLeast(bound) => value >= *bound,
            Assertion::AtMost(bound) => value <= *bound,
            Assertion::GreaterThan(bound) => value > *bound,
            Assertion::LessThan(bound) => value < *bound,
            Assertion::Between { min, max } => value >= *min && value <= *max,
            Assertion::Custom { predicate, .. } => {
                return catch_unwind(AssertUnwindSafe(|| predicate(value))).map_err(|payload| {
                    payload
                        .downcast_ref::<&str>()
                        .map(|message| message.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "custom assertion panicked".to_string())
                });
            }
        };
        Ok(holds)
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::Equals(expected) => write!(f, "== {expected}"),
            Assertion::IsOne => f.write_str("== 1"),
            Assertion::AtLeast(bound) => write!(f, ">= {bound}"),
            Assertion::AtMost(bound) => write!(f, "<= {bound}"),
            Assertion::GreaterThan(bound) => write!(f, "> {bound}"),
            Assertion::LessThan(bound) => write!(f, "< {bound}"),
            Assertion::Between { min, max } => write!(f, "between {min} and {max}"),
            Assertion::Custom { description, .. } => f.write_str(description),
        }
    }
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Assertion({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintStatus {
    Success,
    Failure,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintResult {
    pub constraint: String,
    pub status: ConstraintStatus,
    pub message: Option<String>,
    pub metric_value: Option<f64>,
}

/// A single named assertion over the metrics of one or more analyzers.
///
/// Every analyzer is a dependency; the asserted value is projected from
/// the first one.
#[derive(Debug, Clone)]
pub struct Constraint {
    pub analyzers: Vec<Analyzer>,
    pub projection: Projection,
    pub assertion: Assertion,
    pub hint: Option<String>,
    label: Option<String>,
}

impl Constraint {
    pub fn new(analyzer: Analyzer, assertion: Assertion) -> Self {
        Self {
            analyzers: vec![analyzer],
            projection: Projection::Value,
            assertion,
            hint: None,
            label: None,
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_dependency(mut self, analyzer: Analyzer) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Replace the generated name.
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Re-target every dependency at rows matching `filter`.
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.analyzers = self
            .analyzers
            .into_iter()
            .map(|analyzer| analyzer.with_filter(filter))
            .collect();
        self
    }

    pub fn name(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let subject = self
            .analyzers
            .first()
            .map(|analyzer| analyzer.to_string())
            .unwrap_or_else(|| "<no analyzer>".to_string());
        match &self.projection {
            Projection::Value => subject,
            Projection::BinCount => format!("{subject}.bins"),
            Projection::BinRatio(bin) => format!("{subject}.ratio[{bin}]"),
        }
    }

    /// Human-readable statement of what is expected.
    pub fn description(&self) -> String {
        format!("{} {}", self.name(), self.assertion)
    }

    pub fn evaluate(&self, metrics: &MetricMap) -> ConstraintResult {
        let name = self.description();
        let skipped = |message: String| ConstraintResult {
            constraint: name.clone(),
            status: ConstraintStatus::Skipped,
            message: Some(message),
            metric_value: None,
        };

        let mut values = Vec::with_capacity(self.analyzers.len());
        for analyzer in &self.analyzers {
            match metrics.get(analyzer).map(|metric| &metric.value) {
                None => return skipped(format!("no metric computed for {analyzer}")),
                Some(Err(failure)) => return skipped(format!("{analyzer}: {failure}")),
                Some(Ok(value)) => values.push(value),
            }
        }
        let Some(first) = values.first() else {
            return skipped("constraint has no analyzers".to_string());
        };
        let Some(actual) = self.projection.apply(first) else {
            return skipped(format!("metric value {first} cannot be projected as {:?}", self.projection));
        };

        let with_hint = |message: String| match &self.hint {
            Some(hint) => format!("{message} (hint: {hint})"),
            None => message,
        };
        match self.assertion.check(actual) {
            Ok(true) => ConstraintResult {
                constraint: name,
                status: ConstraintStatus::Success,
                message: None,
                metric_value: Some(actual),
            },
            Ok(false) => ConstraintResult {
                message: Some(with_hint(format!(
                    "{}: actual value {actual} does not satisfy {}",
                    self.name(),
                    self.assertion
                ))),
                constraint: name,
                status: ConstraintStatus::Failure,
                metric_value: Some(actual),
            },
            Err(panic) => ConstraintResult {
                message: Some(with_hint(format!(
                    "{}: assertion failed to evaluate on {actual}: {panic}",
                    self.name()
                ))),
                constraint: name,
                status: ConstraintStatus::Failure,
                metric_value: Some(actual),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataproof_analyzers::{Entity, MetricFailure};

    fn metrics(analyzer: &Analyzer, value: Result<MetricValue, MetricFailure>) -> MetricMap {
        let mut map = MetricMap::new();
        map.insert(
            analyzer.clone(),
            Metric {
                entity: Entity::Dataset,
                instance: "*".to_string(),
                name: "Size".to_string(),
                value,
            },
        );
        map
    }

    #[test]
    fn failure_message_names_actual_and_expected() {
        let size = Analyzer::size();
        let constraint = Constraint::new(size.clone(), Assertion::Equals(10.0));
        let result = constraint.evaluate(&metrics(&size, Ok(MetricValue::Long(5))));
        assert_eq!(result.status, ConstraintStatus::Failure);
        let message = result.message.expect("message");
        assert!(message.contains("Size(*)"), "{message}");
        assert!(message.contains("actual value 5"), "{message}");
        assert!(message.contains("== 10"), "{message}");
    }

    #[test]
    fn failed_dependency_skips() {
        let size = Analyzer::size();
        let constraint = Constraint::new(size.clone(), Assertion::AtLeast(0.0));
        let result =
            constraint.evaluate(&metrics(&size, Err(MetricFailure::analysis("scan failed"))));
        assert_eq!(result.status, ConstraintStatus::Skipped);
        assert!(result.message.expect("message").contains("scan failed"));

        let result = constraint.evaluate(&MetricMap::new());
        assert_eq!(result.status, ConstraintStatus::Skipped);
    }

    #[test]
    fn equality_tolerates_rounding() {
        assert_eq!(Assertion::Equals(0.3).check(0.1 + 0.2), Ok(true));
        assert_eq!(Assertion::Between { min: 1.0, max: 2.0 }.check(2.0), Ok(true));
        assert_eq!(Assertion::GreaterThan(1.0).check(1.0), Ok(false));
    }

    #[test]
    fn is_one_is_exact() {
        assert_eq!(Assertion::IsOne.check(1.0), Ok(true));
        assert_eq!(Assertion::IsOne.check(1.0 - 1e-10), Ok(false));
        assert_eq!(Assertion::Equals(1.0).check(1.0 - 1e-10), Ok(true));
        assert_eq!(Assertion::IsOne.to_string(), "== 1");
    }

    #[test]
    fn panicking_custom_assertion_is_a_failure() {
        let size = Analyzer::size();
        let constraint = Constraint::new(
            size.clone(),
            Assertion::custom("never panics", |_| panic!("boom")),
        );
        let result = constraint.evaluate(&metrics(&size, Ok(MetricValue::Long(1))));
        assert_eq!(result.status, ConstraintStatus::Failure);
        assert!(result.message.expect("message").contains("boom"));
    }

    #[test]
    fn hints_are_appended_to_failures() {
        let size = Analyzer::size();
        let constraint =
            Constraint::new(size.clone(), Assertion::AtLeast(3.0)).with_hint("load more data");
        let result = constraint.evaluate(&metrics(&size, Ok(MetricValue::Long(1))));
        assert!(result.message.expect("message").ends_with("(hint: load more data)"));
    }
}
