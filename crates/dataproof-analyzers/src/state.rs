//! Partial aggregates and their merge.
//!
//! Every state forms a commutative monoid: [`State::empty`] is the identity
//! of [`State::merge`]. Counters and sketches merge exactly; the float
//! accumulators of [`MomentsState`] and [`CorrelationState`] are associative
//! up to floating point rounding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dataproof_core::Value;

use crate::descriptor::Computation;
use crate::error::StateError;
use crate::records;
use crate::sketch::{DEFAULT_PRECISION, DistinctSketch, QuantileSketch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountState {
    pub rows: u64,
}

impl CountState {
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            rows: self.rows + other.rows,
        }
    }
}

/// Matching rows over rows considered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioState {
    pub matches: u64,
    pub total: u64,
}

impl RatioState {
    pub fn observe(&mut self, matched: bool) {
        self.total += 1;
        if matched {
            self.matches += 1;
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            matches: self.matches + other.matches,
            total: self.total + other.total,
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.matches as f64 / self.total as f64)
    }
}

/// Count, sum and sum of squares of the non-null values of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MomentsState {
    pub count: u64,
    #[serde(with = "records::float")]
    pub sum: f64,
    #[serde(with = "records::float")]
    pub sum_squares: f64,
}

impl MomentsState {
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares += value * value;
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            sum_squares: self.sum_squares + other.sum_squares,
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// Population variance.
    pub fn variance(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.sum_squares / self.count as f64 - mean * mean;
        Some(variance.max(0.0))
    }
}

/// Minimum and maximum over the non-null values of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtremaState {
    pub count: u64,
    #[serde(default, with = "records::optional_float")]
    pub min: Option<f64>,
    #[serde(default, with = "records::optional_float")]
    pub max: Option<f64>,
}

impl ExtremaState {
    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    pub fn merge(&self, other: &Self) -> Self {
        let pick = |a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64| match (a, b) {
            (Some(a), Some(b)) => Some(f(a, b)),
            (a, b) => a.or(b),
        };
        Self {
            count: self.count + other.count,
            min: pick(self.min, other.min, f64::min),
            max: pick(self.max, other.max, f64::max),
        }
    }
}

/// Co-moment sums over rows where both columns are non-null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationState {
    pub count: u64,
    #[serde(with = "records::float")]
    pub sum_x: f64,
    #[serde(with = "records::float")]
    pub sum_y: f64,
    #[serde(with = "records::float")]
    pub sum_xy: f64,
    #[serde(with = "records::float")]
    pub sum_xx: f64,
    #[serde(with = "records::float")]
    pub sum_yy: f64,
}

impl CorrelationState {
    pub fn observe(&mut self, x: f64, y: f64) {
        self.count += 1;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xy += x * y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            count: self.count + other.count,
            sum_x: self.sum_x + other.sum_x,
            sum_y: self.sum_y + other.sum_y,
            sum_xy: self.sum_xy + other.sum_xy,
            sum_xx: self.sum_xx + other.sum_xx,
            sum_yy: self.sum_yy + other.sum_yy,
        }
    }

    /// Pearson coefficient, undefined below two rows or with a constant column.
    pub fn pearson(&self) -> Option<f64> {
        if self.count < 2 {
            return None;
        }
        let n = self.count as f64;
        let covariance = self.sum_xy - self.sum_x * self.sum_y / n;
        let var_x = self.sum_xx - self.sum_x * self.sum_x / n;
        let var_y = self.sum_yy - self.sum_y * self.sum_y / n;
        if var_x <= 0.0 || var_y <= 0.0 {
            return None;
        }
        Some((covariance / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
    }
}

/// Exact frequency table over one or more grouping columns.
///
/// `rows` counts every row that passed the filter, including rows with a
/// null grouping value; those never enter `counts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyState {
    pub rows: u64,
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
}

impl FrequencyState {
    pub fn observe(&mut self, key: Option<String>) {
        self.rows += 1;
        if let Some(key) = key {
            *self.counts.entry(key).or_insert(0) += 1;
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (key, count) in &other.counts {
            *counts.entry(key.clone()).or_insert(0) += count;
        }
        Self {
            rows: self.rows + other.rows,
            counts,
        }
    }

    pub fn distinct(&self) -> u64 {
        self.counts.len() as u64
    }

    pub fn unique(&self) -> u64 {
        self.counts.values().filter(|count| **count == 1).count() as u64
    }

    /// Rows whose grouping values contained a null.
    pub fn null_rows(&self) -> u64 {
        self.rows - self.counts.values().sum::<u64>()
    }

    /// Join rendered values into a single key, escaping `|` and `\`.
    pub fn key_for<S: AsRef<str>>(values: &[S]) -> String {
        values
            .iter()
            .map(|value| value.as_ref().replace('\\', "\\\\").replace('|', "\\|"))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Inverse of [`FrequencyState::key_for`].
    pub fn split_key(key: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = key.chars();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                '|' => parts.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        parts.push(current);
        parts
    }
}

/// Inferred type of a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataTypeClass {
    Unknown,
    Integral,
    Fractional,
    Boolean,
    String,
}

impl DataTypeClass {
    pub const ALL: [DataTypeClass; 5] = [
        DataTypeClass::Unknown,
        DataTypeClass::Integral,
        DataTypeClass::Fractional,
        DataTypeClass::Boolean,
        DataTypeClass::String,
    ];

    /// Text cells are classified by what they parse as.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => DataTypeClass::Unknown,
            Value::Bool(_) => DataTypeClass::Boolean,
            Value::Int(_) => DataTypeClass::Integral,
            Value::Float(_) => DataTypeClass::Fractional,
            Value::Text(text) => {
                let trimmed = text.trim();
                if trimmed.parse::<i64>().is_ok() {
                    DataTypeClass::Integral
                } else if !trimmed.is_empty()
                    && trimmed.parse::<f64>().is_ok_and(|value| value.is_finite())
                {
                    DataTypeClass::Fractional
                } else if trimmed.eq_ignore_ascii_case("true")
                    || trimmed.eq_ignore_ascii_case("false")
                {
                    DataTypeClass::Boolean
                } else {
                    DataTypeClass::String
                }
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            DataTypeClass::Unknown => "Unknown",
            DataTypeClass::Integral => "Integral",
            DataTypeClass::Fractional => "Fractional",
            DataTypeClass::Boolean => "Boolean",
            DataTypeClass::String => "String",
        }
    }
}

/// Per-class cell counts of one column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTypeState {
    pub unknown: u64,
    pub integral: u64,
    pub fractional: u64,
    pub boolean: u64,
    pub string: u64,
}

impl DataTypeState {
    pub fn observe(&mut self, value: &Value) {
        match DataTypeClass::of(value) {
            DataTypeClass::Unknown => self.unknown += 1,
            DataTypeClass::Integral => self.integral += 1,
            DataTypeClass::Fractional => self.fractional += 1,
            DataTypeClass::Boolean => self.boolean += 1,
            DataTypeClass::String => self.string += 1,
        }
    }

    pub fn merge(&self, other: &Self) -> Self {
        Self {
            unknown: self.unknown + other.unknown,
            integral: self.integral + other.integral,
            fractional: self.fractional + other.fractional,
            boolean: self.boolean + other.boolean,
            string: self.string + other.string,
        }
    }

    pub fn count(&self, class: DataTypeClass) -> u64 {
        match class {
            DataTypeClass::Unknown => self.unknown,
            DataTypeClass::Integral => self.integral,
            DataTypeClass::Fractional => self.fractional,
            DataTypeClass::Boolean => self.boolean,
            DataTypeClass::String => self.string,
        }
    }

    pub fn total(&self) -> u64 {
        DataTypeClass::ALL.iter().map(|class| self.count(*class)).sum()
    }
}

/// Partial aggregate of one descriptor over some set of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Count(CountState),
    Ratio(RatioState),
    Moments(MomentsState),
    Extrema(ExtremaState),
    Correlation(CorrelationState),
    Quantiles(QuantileSketch),
    Distinct(DistinctSketch),
    Frequencies(FrequencyState),
    DataTypes(DataTypeState),
}

impl State {
    /// Identity element for the computation.
    pub fn empty(computation: &Computation) -> State {
        match computation {
            Computation::RowCount => State::Count(CountState::default()),
            Computation::NonNullCount { .. }
            | Computation::PredicateCount { .. }
            | Computation::PatternCount { .. } => State::Ratio(RatioState::default()),
            Computation::Moments { .. } => State::Moments(MomentsState::default()),
            Computation::Extrema { .. } | Computation::LengthExtrema { .. } => {
                State::Extrema(ExtremaState::default())
            }
            Computation::Correlation { .. } => State::Correlation(CorrelationState::default()),
            Computation::Quantiles {
                relative_accuracy, ..
            } => State::Quantiles(QuantileSketch::new(relative_accuracy.value())),
            Computation::DistinctEstimate { .. } => {
                State::Distinct(DistinctSketch::new(DEFAULT_PRECISION))
            }
            Computation::Frequencies { .. } => State::Frequencies(FrequencyState::default()),
            Computation::DataTypes { .. } => State::DataTypes(DataTypeState::default()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            State::Count(_) => "count",
            State::Ratio(_) => "ratio",
            State::Moments(_) => "moments",
            State::Extrema(_) => "extrema",
            State::Correlation(_) => "correlation",
            State::Quantiles(_) => "quantiles",
            State::Distinct(_) => "distinct",
            State::Frequencies(_) => "frequencies",
            State::DataTypes(_) => "data_types",
        }
    }

    pub fn merge(&self, other: &State) -> Result<State, StateError> {
        let merged = match (self, other) {
            (State::Count(a), State::Count(b)) => Some(State::Count(a.merge(b))),
            (State::Ratio(a), State::Ratio(b)) => Some(State::Ratio(a.merge(b))),
            (State::Moments(a), State::Moments(b)) => Some(State::Moments(a.merge(b))),
            (State::Extrema(a), State::Extrema(b)) => Some(State::Extrema(a.merge(b))),
            (State::Correlation(a), State::Correlation(b)) => {
                Some(State::Correlation(a.merge(b)))
            }
            (State::Quantiles(a), State::Quantiles(b)) => a.merge(b).map(State::Quantiles),
            (State::Distinct(a), State::Distinct(b)) => a.merge(b).map(State::Distinct),
            (State::Frequencies(a), State::Frequencies(b)) => {
                Some(State::Frequencies(a.merge(b)))
            }
            (State::DataTypes(a), State::DataTypes(b)) => Some(State::DataTypes(a.merge(b))),
            _ => None,
        };
        merged.ok_or_else(|| StateError::DescriptorMismatch {
            left: self.kind().to_string(),
            right: other.kind().to_string(),
        })
    }

    /// Fold `states` into `identity`.
    pub fn merge_all<'a>(
        identity: State,
        states: impl IntoIterator<Item = &'a State>,
    ) -> Result<State, StateError> {
        states
            .into_iter()
            .try_fold(identity, |acc, state| acc.merge(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Probability;

    #[test]
    fn empty_is_identity() {
        let mut moments = MomentsState::default();
        moments.observe(2.0);
        moments.observe(4.0);
        let state = State::Moments(moments);
        let empty = State::empty(&Computation::Moments {
            column: "x".to_string(),
        });
        assert_eq!(state.merge(&empty).expect("merge"), state);
        assert_eq!(empty.merge(&state).expect("merge"), state);
    }

    #[test]
    fn mismatched_states_are_rejected() {
        let count = State::Count(CountState { rows: 1 });
        let ratio = State::Ratio(RatioState::default());
        let err = count.merge(&ratio).unwrap_err();
        assert_eq!(
            err,
            StateError::DescriptorMismatch {
                left: "count".to_string(),
                right: "ratio".to_string(),
            }
        );
    }

    #[test]
    fn quantile_states_with_different_accuracy_do_not_merge() {
        let fine = State::empty(&Computation::Quantiles {
            column: "x".to_string(),
            relative_accuracy: Probability::new(0.01),
        });
        let coarse = State::empty(&Computation::Quantiles {
            column: "x".to_string(),
            relative_accuracy: Probability::new(0.1),
        });
        assert!(fine.merge(&coarse).is_err());
    }

    #[test]
    fn variance_is_population_variance() {
        let mut moments = MomentsState::default();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            moments.observe(value);
        }
        assert_eq!(moments.mean(), Some(5.0));
        assert_eq!(moments.variance(), Some(4.0));
    }

    #[test]
    fn frequency_keys_round_trip_separators() {
        let parts = vec!["a|b".to_string(), "c\\d".to_string(), String::new()];
        let key = FrequencyState::key_for(&parts);
        assert_eq!(FrequencyState::split_key(&key), parts);
    }

    #[test]
    fn frequency_null_rows_are_counted_apart() {
        let mut state = FrequencyState::default();
        state.observe(Some("a".to_string()));
        state.observe(None);
        state.observe(Some("a".to_string()));
        assert_eq!(state.rows, 3);
        assert_eq!(state.null_rows(), 1);
        assert_eq!(state.distinct(), 1);
        assert_eq!(state.unique(), 0);
    }

    #[test]
    fn classifies_text_cells() {
        assert_eq!(DataTypeClass::of(&Value::from("12")), DataTypeClass::Integral);
        assert_eq!(DataTypeClass::of(&Value::from("1.5")), DataTypeClass::Fractional);
        assert_eq!(DataTypeClass::of(&Value::from("TRUE")), DataTypeClass::Boolean);
        assert_eq!(DataTypeClass::of(&Value::from("abc")), DataTypeClass::String);
        assert_eq!(DataTypeClass::of(&Value::Null), DataTypeClass::Unknown);
    }

    #[test]
    fn states_survive_json() {
        let mut frequencies = FrequencyState::default();
        frequencies.observe(Some("x".to_string()));
        let mut sketch = QuantileSketch::new(0.01);
        sketch.insert(3.0);
        sketch.insert(-1.0);
        for state in [State::Frequencies(frequencies), State::Quantiles(sketch)] {
            let json = serde_json::to_string(&state).expect("serialize");
            let back: State = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, state);
        }
    }
}
