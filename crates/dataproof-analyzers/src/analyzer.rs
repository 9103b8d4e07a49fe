//! Analyzer catalogue.
//!
//! An analyzer names a metric, declares the [`Descriptor`] it needs and
//! turns the merged state of that descriptor into a [`Metric`]. Analyzers
//! never touch rows themselves.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use dataproof_core::{ColumnType, Schema};

use crate::descriptor::{Computation, Descriptor, Probability};
use crate::metric::{
    Distribution, DistributionValue, Entity, Metric, MetricFailure, MetricValue,
};
use crate::state::{DataTypeClass, FrequencyState, State};

/// Label of the histogram bin that collects null values.
pub const NULL_BIN: &str = "NullValue";

/// Default number of bins a histogram keeps before folding the tail.
pub const DEFAULT_MAX_HISTOGRAM_BINS: usize = 1000;

/// Regular expressions for common text formats.
pub struct Patterns;

impl Patterns {
    pub const EMAIL: &'static str = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$";
    pub const URL: &'static str =
        r"^(https?|ftp)://[^\s/$.?#].[^\s]*$";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "analyzer", rename_all = "snake_case")]
pub enum Analyzer {
    Size {
        filter: Option<String>,
    },
    Completeness {
        column: String,
        filter: Option<String>,
    },
    Compliance {
        instance: String,
        predicate: String,
        filter: Option<String>,
    },
    PatternMatch {
        column: String,
        pattern: String,
        filter: Option<String>,
    },
    Mean {
        column: String,
        filter: Option<String>,
    },
    Sum {
        column: String,
        filter: Option<String>,
    },
    StandardDeviation {
        column: String,
        filter: Option<String>,
    },
    Minimum {
        column: String,
        filter: Option<String>,
    },
    Maximum {
        column: String,
        filter: Option<String>,
    },
    MinLength {
        column: String,
        filter: Option<String>,
    },
    MaxLength {
        column: String,
        filter: Option<String>,
    },
    Correlation {
        first: String,
        second: String,
        filter: Option<String>,
    },
    ApproxQuantile {
        column: String,
        quantile: Probability,
        relative_error: Probability,
        filter: Option<String>,
    },
    ApproxCountDistinct {
        column: String,
        filter: Option<String>,
    },
    Uniqueness {
        columns: Vec<String>,
        filter: Option<String>,
    },
    Distinctness {
        columns: Vec<String>,
        filter: Option<String>,
    },
    UniqueValueRatio {
        columns: Vec<String>,
        filter: Option<String>,
    },
    CountDistinct {
        columns: Vec<String>,
        filter: Option<String>,
    },
    Entropy {
        column: String,
        filter: Option<String>,
    },
    MutualInformation {
        first: String,
        second: String,
        filter: Option<String>,
    },
    Histogram {
        column: String,
        max_bins: usize,
        filter: Option<String>,
    },
    DataType {
        column: String,
        filter: Option<String>,
    },
}

fn owned(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|column| column.to_string()).collect()
}

impl Analyzer {
    pub fn size() -> Self {
        Analyzer::Size { filter: None }
    }

    pub fn completeness(column: &str) -> Self {
        Analyzer::Completeness {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn compliance(instance: &str, predicate: &str) -> Self {
        Analyzer::Compliance {
            instance: instance.to_string(),
            predicate: predicate.to_string(),
            filter: None,
        }
    }

    pub fn pattern_match(column: &str, pattern: &str) -> Self {
        Analyzer::PatternMatch {
            column: column.to_string(),
            pattern: pattern.to_string(),
            filter: None,
        }
    }

    pub fn mean(column: &str) -> Self {
        Analyzer::Mean {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn sum(column: &str) -> Self {
        Analyzer::Sum {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn standard_deviation(column: &str) -> Self {
        Analyzer::StandardDeviation {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn minimum(column: &str) -> Self {
        Analyzer::Minimum {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn maximum(column: &str) -> Self {
        Analyzer::Maximum {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn min_length(column: &str) -> Self {
        Analyzer::MinLength {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn max_length(column: &str) -> Self {
        Analyzer::MaxLength {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn correlation(first: &str, second: &str) -> Self {
        Analyzer::Correlation {
            first: first.to_string(),
            second: second.to_string(),
            filter: None,
        }
    }

    pub fn approx_quantile(column: &str, quantile: f64) -> Self {
        Analyzer::ApproxQuantile {
            column: column.to_string(),
            quantile: Probability::new(quantile),
            relative_error: Probability::new(crate::sketch::DEFAULT_RELATIVE_ACCURACY),
            filter: None,
        }
    }

    pub fn approx_count_distinct(column: &str) -> Self {
        Analyzer::ApproxCountDistinct {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn uniqueness(columns: &[&str]) -> Self {
        Analyzer::Uniqueness {
            columns: owned(columns),
            filter: None,
        }
    }

    pub fn distinctness(columns: &[&str]) -> Self {
        Analyzer::Distinctness {
            columns: owned(columns),
            filter: None,
        }
    }

    pub fn unique_value_ratio(columns: &[&str]) -> Self {
        Analyzer::UniqueValueRatio {
            columns: owned(columns),
            filter: None,
        }
    }

    pub fn count_distinct(columns: &[&str]) -> Self {
        Analyzer::CountDistinct {
            columns: owned(columns),
            filter: None,
        }
    }

    pub fn entropy(column: &str) -> Self {
        Analyzer::Entropy {
            column: column.to_string(),
            filter: None,
        }
    }

    pub fn mutual_information(first: &str, second: &str) -> Self {
        Analyzer::MutualInformation {
            first: first.to_string(),
            second: second.to_string(),
            filter: None,
        }
    }

    pub fn histogram(column: &str) -> Self {
        Analyzer::Histogram {
            column: column.to_string(),
            max_bins: DEFAULT_MAX_HISTOGRAM_BINS,
            filter: None,
        }
    }

    pub fn data_type(column: &str) -> Self {
        Analyzer::DataType {
            column: column.to_string(),
            filter: None,
        }
    }

    fn filter_slot(&mut self) -> &mut Option<String> {
        match self {
            Analyzer::Size { filter }
            | Analyzer::Completeness { filter, .. }
            | Analyzer::Compliance { filter, .. }
            | Analyzer::PatternMatch { filter, .. }
            | Analyzer::Mean { filter, .. }
            | Analyzer::Sum { filter, .. }
            | Analyzer::StandardDeviation { filter, .. }
            | Analyzer::Minimum { filter, .. }
            | Analyzer::Maximum { filter, .. }
            | Analyzer::MinLength { filter, .. }
            | Analyzer::MaxLength { filter, .. }
            | Analyzer::Correlation { filter, .. }
            | Analyzer::ApproxQuantile { filter, .. }
            | Analyzer::ApproxCountDistinct { filter, .. }
            | Analyzer::Uniqueness { filter, .. }
            | Analyzer::Distinctness { filter, .. }
            | Analyzer::UniqueValueRatio { filter, .. }
            | Analyzer::CountDistinct { filter, .. }
            | Analyzer::Entropy { filter, .. }
            | Analyzer::MutualInformation { filter, .. }
            | Analyzer::Histogram { filter, .. }
            | Analyzer::DataType { filter, .. } => filter,
        }
    }

    /// Restrict the analyzer to rows matching `filter`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        *self.filter_slot() = Some(filter.into());
        self
    }

    pub fn with_optional_filter(mut self, filter: Option<String>) -> Self {
        *self.filter_slot() = filter;
        self
    }

    pub fn filter(&self) -> Option<&str> {
        match self {
            Analyzer::Size { filter }
            | Analyzer::Completeness { filter, .. }
            | Analyzer::Compliance { filter, .. }
            | Analyzer::PatternMatch { filter, .. }
            | Analyzer::Mean { filter, .. }
            | Analyzer::Sum { filter, .. }
            | Analyzer::StandardDeviation { filter, .. }
            | Analyzer::Minimum { filter, .. }
            | Analyzer::Maximum { filter, .. }
            | Analyzer::MinLength { filter, .. }
            | Analyzer::MaxLength { filter, .. }
            | Analyzer::Correlation { filter, .. }
            | Analyzer::ApproxQuantile { filter, .. }
            | Analyzer::ApproxCountDistinct { filter, .. }
            | Analyzer::Uniqueness { filter, .. }
            | Analyzer::Distinctness { filter, .. }
            | Analyzer::UniqueValueRatio { filter, .. }
            | Analyzer::CountDistinct { filter, .. }
            | Analyzer::Entropy { filter, .. }
            | Analyzer::MutualInformation { filter, .. }
            | Analyzer::Histogram { filter, .. }
            | Analyzer::DataType { filter, .. } => filter.as_deref(),
        }
    }

    pub fn histogram_with_bins(column: &str, max_bins: usize) -> Self {
        Analyzer::Histogram {
            column: column.to_string(),
            max_bins,
            filter: None,
        }
    }

    /// Metric name, following the usual data-quality vocabulary.
    pub fn name(&self) -> String {
        let name = match self {
            Analyzer::Size { .. } => "Size",
            Analyzer::Completeness { .. } => "Completeness",
            Analyzer::Compliance { .. } => "Compliance",
            Analyzer::PatternMatch { .. } => "PatternMatch",
            Analyzer::Mean { .. } => "Mean",
            Analyzer::Sum { .. } => "Sum",
            Analyzer::StandardDeviation { .. } => "StandardDeviation",
            Analyzer::Minimum { .. } => "Minimum",
            Analyzer::Maximum { .. } => "Maximum",
            Analyzer::MinLength { .. } => "MinLength",
            Analyzer::MaxLength { .. } => "MaxLength",
            Analyzer::Correlation { .. } => "Correlation",
            Analyzer::ApproxQuantile { quantile, .. } => {
                return format!("ApproxQuantile-{quantile}");
            }
            Analyzer::ApproxCountDistinct { .. } => "ApproxCountDistinct",
            Analyzer::Uniqueness { .. } => "Uniqueness",
            Analyzer::Distinctness { .. } => "Distinctness",
            Analyzer::UniqueValueRatio { .. } => "UniqueValueRatio",
            Analyzer::CountDistinct { .. } => "CountDistinct",
            Analyzer::Entropy { .. } => "Entropy",
            Analyzer::MutualInformation { .. } => "MutualInformation",
            Analyzer::Histogram { .. } => "Histogram",
            Analyzer::DataType { .. } => "DataType",
        };
        name.to_string()
    }

    pub fn entity(&self) -> Entity {
        match self {
            Analyzer::Size { .. } => Entity::Dataset,
            Analyzer::Correlation { .. } | Analyzer::MutualInformation { .. } => {
                Entity::Multicolumn
            }
            Analyzer::Uniqueness { columns, .. }
            | Analyzer::Distinctness { columns, .. }
            | Analyzer::UniqueValueRatio { columns, .. }
            | Analyzer::CountDistinct { columns, .. } => {
                if columns.len() == 1 {
                    Entity::Column
                } else {
                    Entity::Multicolumn
                }
            }
            _ => Entity::Column,
        }
    }

    pub fn instance(&self) -> String {
        match self {
            Analyzer::Size { .. } => "*".to_string(),
            Analyzer::Compliance { instance, .. } => instance.clone(),
            Analyzer::Correlation { first, second, .. }
            | Analyzer::MutualInformation { first, second, .. } => format!("{first},{second}"),
            Analyzer::Uniqueness { columns, .. }
            | Analyzer::Distinctness { columns, .. }
            | Analyzer::UniqueValueRatio { columns, .. }
            | Analyzer::CountDistinct { columns, .. } => columns.join(","),
            Analyzer::Completeness { column, .. }
            | Analyzer::PatternMatch { column, .. }
            | Analyzer::Mean { column, .. }
            | Analyzer::Sum { column, .. }
            | Analyzer::StandardDeviation { column, .. }
            | Analyzer::Minimum { column, .. }
            | Analyzer::Maximum { column, .. }
            | Analyzer::MinLength { column, .. }
            | Analyzer::MaxLength { column, .. }
            | Analyzer::ApproxQuantile { column, .. }
            | Analyzer::ApproxCountDistinct { column, .. }
            | Analyzer::Entropy { column, .. }
            | Analyzer::Histogram { column, .. }
            | Analyzer::DataType { column, .. } => column.clone(),
        }
    }

    /// What has to be scanned for this analyzer.
    pub fn descriptor(&self) -> Descriptor {
        let computation = match self {
            Analyzer::Size { .. } => Computation::RowCount,
            Analyzer::Completeness { column, .. } => Computation::NonNullCount {
                column: column.clone(),
            },
            Analyzer::Compliance { predicate, .. } => Computation::PredicateCount {
                predicate: predicate.clone(),
            },
            Analyzer::PatternMatch {
                column, pattern, ..
            } => Computation::PatternCount {
                column: column.clone(),
                pattern: pattern.clone(),
            },
            Analyzer::Mean { column, .. }
            | Analyzer::Sum { column, .. }
            | Analyzer::StandardDeviation { column, .. } => Computation::Moments {
                column: column.clone(),
            },
            Analyzer::Minimum { column, .. } | Analyzer::Maximum { column, .. } => {
                Computation::Extrema {
                    column: column.clone(),
                }
            }
            Analyzer::MinLength { column, .. } | Analyzer::MaxLength { column, .. } => {
                Computation::LengthExtrema {
                    column: column.clone(),
                }
            }
            Analyzer::Correlation { first, second, .. } => Computation::Correlation {
                first: first.clone(),
                second: second.clone(),
            },
            Analyzer::ApproxQuantile {
                column,
                relative_error,
                ..
            } => Computation::Quantiles {
                column: column.clone(),
                relative_accuracy: *relative_error,
            },
            Analyzer::ApproxCountDistinct { column, .. } => Computation::DistinctEstimate {
                column: column.clone(),
            },
            Analyzer::Uniqueness { columns, .. }
            | Analyzer::Distinctness { columns, .. }
            | Analyzer::UniqueValueRatio { columns, .. }
            | Analyzer::CountDistinct { columns, .. } => Computation::Frequencies {
                columns: columns.clone(),
            },
            Analyzer::Entropy { column, .. } | Analyzer::Histogram { column, .. } => {
                Computation::Frequencies {
                    columns: vec![column.clone()],
                }
            }
            Analyzer::MutualInformation { first, second, .. } => Computation::Frequencies {
                columns: vec![first.clone(), second.clone()],
            },
            Analyzer::DataType { column, .. } => Computation::DataTypes {
                column: column.clone(),
            },
        };
        Descriptor::new(computation, self.filter().map(str::to_string))
    }

    /// Schema problems that prevent this analyzer from running.
    pub fn preconditions(&self, schema: &Schema) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            Analyzer::Size { .. } | Analyzer::Compliance { .. } => {}
            Analyzer::Completeness { column, .. }
            | Analyzer::ApproxCountDistinct { column, .. }
            | Analyzer::Entropy { column, .. }
            | Analyzer::DataType { column, .. } => require_column(schema, column, &mut problems),
            Analyzer::PatternMatch {
                column, pattern, ..
            } => {
                require_type(schema, column, ColumnType::String, &mut problems);
                if let Err(err) = regex::Regex::new(pattern) {
                    problems.push(format!("invalid pattern '{pattern}': {err}"));
                }
            }
            Analyzer::Mean { column, .. }
            | Analyzer::Sum { column, .. }
            | Analyzer::StandardDeviation { column, .. }
            | Analyzer::Minimum { column, .. }
            | Analyzer::Maximum { column, .. } => require_numeric(schema, column, &mut problems),
            Analyzer::MinLength { column, .. } | Analyzer::MaxLength { column, .. } => {
                require_type(schema, column, ColumnType::String, &mut problems)
            }
            Analyzer::Correlation { first, second, .. } => {
                require_numeric(schema, first, &mut problems);
                require_numeric(schema, second, &mut problems);
            }
            Analyzer::ApproxQuantile {
                column,
                quantile,
                relative_error,
                ..
            } => {
                require_numeric(schema, column, &mut problems);
                if !quantile.is_within_unit_interval() {
                    problems.push(format!("quantile {quantile} is outside [0, 1]"));
                }
                let error = relative_error.value();
                if !(error > 0.0 && error < 1.0) {
                    problems.push(format!("relative error {relative_error} is outside (0, 1)"));
                }
            }
            Analyzer::Uniqueness { columns, .. }
            | Analyzer::Distinctness { columns, .. }
            | Analyzer::UniqueValueRatio { columns, .. }
            | Analyzer::CountDistinct { columns, .. } => {
                if columns.is_empty() {
                    problems.push("at least one column is required".to_string());
                }
                for column in columns {
                    require_column(schema, column, &mut problems);
                }
            }
            Analyzer::MutualInformation { first, second, .. } => {
                require_column(schema, first, &mut problems);
                require_column(schema, second, &mut problems);
            }
            Analyzer::Histogram {
                column, max_bins, ..
            } => {
                require_column(schema, column, &mut problems);
                if *max_bins == 0 {
                    problems.push("histogram needs at least one bin".to_string());
                }
            }
        }
        problems
    }

    /// Metric carrying `value` under this analyzer's name.
    pub fn metric(&self, value: Result<MetricValue, MetricFailure>) -> Metric {
        Metric {
            entity: self.entity(),
            instance: self.instance(),
            name: self.name(),
            value,
        }
    }

    pub fn failed(&self, failure: MetricFailure) -> Metric {
        self.metric(Err(failure))
    }

    /// Turn a merged state into this analyzer's metric.
    pub fn compute_metric(&self, state: &State) -> Metric {
        self.metric(self.value_from(state))
    }

    fn value_from(&self, state: &State) -> Result<MetricValue, MetricFailure> {
        match (self, state) {
            (Analyzer::Size { .. }, State::Count(count)) => {
                Ok(MetricValue::Long(count.rows as i64))
            }
            (
                Analyzer::Completeness { .. }
                | Analyzer::Compliance { .. }
                | Analyzer::PatternMatch { .. },
                State::Ratio(ratio),
            ) => ratio.ratio().map(MetricValue::Double).ok_or_else(no_rows),
            (Analyzer::Mean { .. }, State::Moments(moments)) => {
                moments.mean().map(MetricValue::Double).ok_or_else(no_rows)
            }
            (Analyzer::Sum { .. }, State::Moments(moments)) => {
                if moments.count == 0 {
                    Err(no_rows())
                } else {
                    Ok(MetricValue::Double(moments.sum))
                }
            }
            (Analyzer::StandardDeviation { .. }, State::Moments(moments)) => moments
                .variance()
                .map(|variance| MetricValue::Double(variance.sqrt()))
                .ok_or_else(no_rows),
            (
                Analyzer::Minimum { .. } | Analyzer::MinLength { .. },
                State::Extrema(extrema),
            ) => extrema.min.map(MetricValue::Double).ok_or_else(no_rows),
            (
                Analyzer::Maximum { .. } | Analyzer::MaxLength { .. },
                State::Extrema(extrema),
            ) => extrema.max.map(MetricValue::Double).ok_or_else(no_rows),
            (Analyzer::Correlation { .. }, State::Correlation(correlation)) => correlation
                .pearson()
                .map(MetricValue::Double)
                .ok_or_else(|| {
                    MetricFailure::insufficient(
                        "correlation needs at least two rows and non-constant columns",
                    )
                }),
            (Analyzer::ApproxQuantile { quantile, .. }, State::Quantiles(sketch)) => sketch
                .quantile(quantile.value())
                .map(MetricValue::Double)
                .ok_or_else(no_rows),
            (Analyzer::ApproxCountDistinct { .. }, State::Distinct(sketch)) => {
                Ok(MetricValue::Double(sketch.estimate().round()))
            }
            (Analyzer::Uniqueness { .. }, State::Frequencies(frequencies)) => {
                fraction(frequencies.unique(), frequencies.rows)
            }
            (Analyzer::Distinctness { .. }, State::Frequencies(frequencies)) => {
                fraction(frequencies.distinct(), frequencies.rows)
            }
            (Analyzer::UniqueValueRatio { .. }, State::Frequencies(frequencies)) => {
                fraction(frequencies.unique(), frequencies.distinct())
            }
            (Analyzer::CountDistinct { .. }, State::Frequencies(frequencies)) => {
                Ok(MetricValue::Long(frequencies.distinct() as i64))
            }
            (Analyzer::Entropy { .. }, State::Frequencies(frequencies)) => entropy(frequencies),
            (Analyzer::MutualInformation { .. }, State::Frequencies(frequencies)) => {
                mutual_information(frequencies)
            }
            (Analyzer::Histogram { max_bins, .. }, State::Frequencies(frequencies)) => Ok(
                MetricValue::Distribution(histogram(frequencies, *max_bins)),
            ),
            (Analyzer::DataType { .. }, State::DataTypes(types)) => {
                let total = types.total();
                if total == 0 {
                    return Err(no_rows());
                }
                let values = DataTypeClass::ALL
                    .iter()
                    .map(|class| {
                        let absolute = types.count(*class);
                        (
                            class.label().to_string(),
                            DistributionValue {
                                absolute,
                                ratio: absolute as f64 / total as f64,
                            },
                        )
                    })
                    .collect::<BTreeMap<_, _>>();
                Ok(MetricValue::Distribution(Distribution {
                    number_of_bins: values.len() as u64,
                    values,
                }))
            }
            (_, other) => Err(MetricFailure::analysis(format!(
                "{} cannot be computed from a {} state",
                self.name(),
                other.kind()
            ))),
        }
    }
}

impl fmt::Display for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.instance())?;
        if let Some(filter) = self.filter() {
            write!(f, " where {filter}")?;
        }
        Ok(())
    }
}

fn no_rows() -> MetricFailure {
    MetricFailure::insufficient("no rows to compute the metric from")
}

fn fraction(numerator: u64, denominator: u64) -> Result<MetricValue, MetricFailure> {
    if denominator == 0 {
        return Err(no_rows());
    }
    Ok(MetricValue::Double(numerator as f64 / denominator as f64))
}

fn require_column(schema: &Schema, column: &str, problems: &mut Vec<String>) {
    if !schema.has_column(column) {
        problems.push(format!("column '{column}' does not exist"));
    }
}

fn require_numeric(schema: &Schema, column: &str, problems: &mut Vec<String>) {
    match schema.column(column) {
        None => problems.push(format!("column '{column}' does not exist")),
        Some(found) if !found.column_type.is_numeric() => problems.push(format!(
            "column '{column}' has type {:?}, expected a numeric type",
            found.column_type
        )),
        Some(_) => {}
    }
}

fn require_type(schema: &Schema, column: &str, expected: ColumnType, problems: &mut Vec<String>) {
    match schema.column(column) {
        None => problems.push(format!("column '{column}' does not exist")),
        Some(found) if found.column_type != expected => problems.push(format!(
            "column '{column}' has type {:?}, expected {expected:?}",
            found.column_type
        )),
        Some(_) => {}
    }
}

fn entropy(frequencies: &FrequencyState) -> Result<MetricValue, MetricFailure> {
    if frequencies.rows == 0 {
        return Err(no_rows());
    }
    let rows = frequencies.rows as f64;
    let value = frequencies
        .counts
        .values()
        .map(|count| {
            let p = *count as f64 / rows;
            -p * p.ln()
        })
        .sum();
    Ok(MetricValue::Double(value))
}

fn mutual_information(frequencies: &FrequencyState) -> Result<MetricValue, MetricFailure> {
    let total: u64 = frequencies.counts.values().sum();
    if total == 0 {
        return Err(no_rows());
    }
    let mut first: BTreeMap<String, u64> = BTreeMap::new();
    let mut second: BTreeMap<String, u64> = BTreeMap::new();
    let mut joint = Vec::with_capacity(frequencies.counts.len());
    for (key, count) in &frequencies.counts {
        let mut parts = FrequencyState::split_key(key).into_iter();
        let (Some(a), Some(b)) = (parts.next(), parts.next()) else {
            return Err(MetricFailure::analysis(format!(
                "frequency key '{key}' does not hold two values"
            )));
        };
        *first.entry(a.clone()).or_insert(0) += count;
        *second.entry(b.clone()).or_insert(0) += count;
        joint.push((a, b, *count));
    }
    let n = total as f64;
    let mut value = 0.0;
    for (a, b, count) in joint {
        let p_ab = count as f64 / n;
        let p_a = first.get(&a).copied().unwrap_or(0) as f64 / n;
        let p_b = second.get(&b).copied().unwrap_or(0) as f64 / n;
        value += p_ab * (p_ab / (p_a * p_b)).ln();
    }
    Ok(MetricValue::Double(value))
}

fn histogram(frequencies: &FrequencyState, max_bins: usize) -> Distribution {
    if frequencies.rows == 0 {
        return Distribution::default();
    }
    let mut bins: Vec<(String, u64)> = frequencies
        .counts
        .iter()
        .map(|(key, count)| {
            let label = FrequencyState::split_key(key).into_iter().next().unwrap_or_default();
            (label, *count)
        })
        .collect();
    let nulls = frequencies.null_rows();
    if nulls > 0 {
        bins.push((NULL_BIN.to_string(), nulls));
    }
    let number_of_bins = bins.len() as u64;
    bins.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    bins.truncate(max_bins);

    let rows = frequencies.rows as f64;
    let values = bins
        .into_iter()
        .map(|(label, absolute)| {
            (
                label,
                DistributionValue {
                    absolute,
                    ratio: absolute as f64 / rows,
                },
            )
        })
        .collect();
    Distribution {
        values,
        number_of_bins,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CountState, ExtremaState, MomentsState, RatioState};
    use dataproof_core::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", ColumnType::Integral),
            Column::new("name", ColumnType::String),
            Column::new("score", ColumnType::Fractional),
        ])
    }

    fn frequencies(values: &[Option<&str>]) -> FrequencyState {
        let mut state = FrequencyState::default();
        for value in values {
            state.observe(value.map(|value| FrequencyState::key_for(&[value])));
        }
        state
    }

    #[test]
    fn analyzers_sharing_a_computation_share_a_descriptor() {
        assert_eq!(
            Analyzer::mean("score").descriptor(),
            Analyzer::standard_deviation("score").descriptor()
        );
        assert_ne!(
            Analyzer::mean("score").descriptor(),
            Analyzer::mean("score").with_filter("id > 1").descriptor()
        );
        assert_eq!(
            Analyzer::uniqueness(&["id"]).descriptor(),
            Analyzer::histogram("id").descriptor()
        );
    }

    #[test]
    fn preconditions_check_types() {
        let schema = schema();
        assert!(Analyzer::mean("score").preconditions(&schema).is_empty());
        assert_eq!(Analyzer::mean("name").preconditions(&schema).len(), 1);
        assert_eq!(Analyzer::completeness("missing").preconditions(&schema).len(), 1);
        assert_eq!(Analyzer::max_length("id").preconditions(&schema).len(), 1);
        assert_eq!(
            Analyzer::pattern_match("name", "(unclosed").preconditions(&schema).len(),
            1
        );
        assert_eq!(
            Analyzer::approx_quantile("score", 1.5).preconditions(&schema).len(),
            1
        );
    }

    #[test]
    fn completeness_of_no_rows_is_insufficient() {
        let metric = Analyzer::completeness("id").compute_metric(&State::Ratio(RatioState {
            matches: 0,
            total: 0,
        }));
        let failure = metric.failure().expect("failure");
        assert_eq!(failure.kind, crate::metric::FailureKind::InsufficientData);
    }

    #[test]
    fn size_of_no_rows_is_zero() {
        let metric = Analyzer::size().compute_metric(&State::Count(CountState { rows: 0 }));
        assert_eq!(metric.value, Ok(MetricValue::Long(0)));
        assert_eq!(metric.entity, Entity::Dataset);
        assert_eq!(metric.instance, "*");
    }

    #[test]
    fn mean_and_standard_deviation_from_moments() {
        let mut moments = MomentsState::default();
        for value in [1.0, 2.0, 3.0, 4.0] {
            moments.observe(value);
        }
        let state = State::Moments(moments);
        assert_eq!(Analyzer::mean("score").compute_metric(&state).as_f64(), Some(2.5));
        let deviation = Analyzer::standard_deviation("score")
            .compute_metric(&state)
            .as_f64()
            .expect("deviation");
        assert!((deviation - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn frequency_based_metrics() {
        let state = State::Frequencies(frequencies(&[
            Some("a"),
            Some("a"),
            Some("b"),
            Some("c"),
            None,
        ]));
        let value = |analyzer: Analyzer| analyzer.compute_metric(&state).as_f64();
        assert_eq!(value(Analyzer::uniqueness(&["name"])), Some(2.0 / 5.0));
        assert_eq!(value(Analyzer::distinctness(&["name"])), Some(3.0 / 5.0));
        assert_eq!(value(Analyzer::unique_value_ratio(&["name"])), Some(2.0 / 3.0));
        assert_eq!(value(Analyzer::count_distinct(&["name"])), Some(3.0));
    }

    #[test]
    fn histogram_keeps_null_bin_and_folds_tail() {
        let state = State::Frequencies(frequencies(&[
            Some("a"),
            Some("a"),
            Some("a"),
            Some("b"),
            Some("b"),
            Some("c"),
            None,
        ]));
        let metric = Analyzer::histogram_with_bins("name", 2).compute_metric(&state);
        let distribution = metric
            .value
            .as_ref()
            .ok()
            .and_then(MetricValue::as_distribution)
            .expect("distribution");
        assert_eq!(distribution.number_of_bins, 4);
        assert_eq!(distribution.values.len(), 2);
        assert_eq!(distribution.get("a").map(|v| v.absolute), Some(3));
        assert_eq!(distribution.get("b").map(|v| v.absolute), Some(2));

        let full = Analyzer::histogram("name").compute_metric(&state);
        let distribution = full
            .value
            .as_ref()
            .ok()
            .and_then(MetricValue::as_distribution)
            .expect("distribution");
        assert_eq!(distribution.get(NULL_BIN).map(|v| v.absolute), Some(1));
    }

    #[test]
    fn mutual_information_of_identical_columns_is_entropy() {
        let mut joint = FrequencyState::default();
        for value in ["x", "x", "y", "z"] {
            joint.observe(Some(FrequencyState::key_for(&[value, value])));
        }
        let single = frequencies(&[Some("x"), Some("x"), Some("y"), Some("z")]);
        let mi = Analyzer::mutual_information("a", "b")
            .compute_metric(&State::Frequencies(joint))
            .as_f64()
            .expect("mi");
        let entropy = Analyzer::entropy("a")
            .compute_metric(&State::Frequencies(single))
            .as_f64()
            .expect("entropy");
        assert!((mi - entropy).abs() < 1e-12);
    }

    #[test]
    fn wrong_state_kind_is_an_analysis_error() {
        let metric = Analyzer::minimum("score").compute_metric(&State::Count(CountState { rows: 3 }));
        let failure = metric.failure().expect("failure");
        assert_eq!(failure.kind, crate::metric::FailureKind::AnalysisError);
        let ok = Analyzer::minimum("score").compute_metric(&State::Extrema(ExtremaState {
            count: 1,
            min: Some(2.0),
            max: Some(2.0),
        }));
        assert_eq!(ok.as_f64(), Some(2.0));
    }

    #[test]
    fn analyzers_serialize_with_a_tag() {
        let analyzer = Analyzer::approx_quantile("score", 0.5).with_filter("id > 3");
        let json = serde_json::to_value(&analyzer).expect("serialize");
        assert_eq!(json["analyzer"], "approx_quantile");
        let back: Analyzer = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, analyzer);
    }
}
