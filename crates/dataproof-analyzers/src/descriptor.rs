use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A number in `[0, 1]` usable as a map key.
///
/// Equality, ordering and hashing use the bit pattern of the value so
/// analyzers carrying quantiles or accuracies can be deduplicated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Probability(f64);

impl Probability {
    pub fn new(value: f64) -> Self {
        // -0.0 and 0.0 must compare equal.
        if value == 0.0 {
            Self(0.0)
        } else {
            Self(value)
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_within_unit_interval(self) -> bool {
        (0.0..=1.0).contains(&self.0)
    }
}

impl PartialEq for Probability {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Probability {}

impl Hash for Probability {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Probability {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Probability {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What has to be computed over the rows of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Computation {
    RowCount,
    NonNullCount {
        column: String,
    },
    PredicateCount {
        predicate: String,
    },
    PatternCount {
        column: String,
        pattern: String,
    },
    Moments {
        column: String,
    },
    Extrema {
        column: String,
    },
    LengthExtrema {
        column: String,
    },
    Correlation {
        first: String,
        second: String,
    },
    Quantiles {
        column: String,
        relative_accuracy: Probability,
    },
    DistinctEstimate {
        column: String,
    },
    Frequencies {
        columns: Vec<String>,
    },
    DataTypes {
        column: String,
    },
}

impl Computation {
    pub fn strategy(&self) -> ScanStrategy {
        match self {
            Computation::Frequencies { columns } => ScanStrategy::Grouping {
                columns: columns.clone(),
            },
            _ => ScanStrategy::Aggregation,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Computation::RowCount => "row_count",
            Computation::NonNullCount { .. } => "non_null_count",
            Computation::PredicateCount { .. } => "predicate_count",
            Computation::PatternCount { .. } => "pattern_count",
            Computation::Moments { .. } => "moments",
            Computation::Extrema { .. } => "extrema",
            Computation::LengthExtrema { .. } => "length_extrema",
            Computation::Correlation { .. } => "correlation",
            Computation::Quantiles { .. } => "quantiles",
            Computation::DistinctEstimate { .. } => "distinct_estimate",
            Computation::Frequencies { .. } => "frequencies",
            Computation::DataTypes { .. } => "data_types",
        }
    }
}

/// Computation plus the row filter it runs under.
///
/// Analyzers with equal descriptors share one scan and one merged state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Descriptor {
    pub computation: Computation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl Descriptor {
    pub fn new(computation: Computation, filter: Option<String>) -> Self {
        Self {
            computation,
            filter,
        }
    }

    pub fn shape(&self) -> ScanShape {
        ScanShape {
            strategy: self.computation.strategy(),
            filter: self.filter.clone(),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.computation.label())?;
        match &self.computation {
            Computation::RowCount => {}
            Computation::NonNullCount { column }
            | Computation::Moments { column }
            | Computation::Extrema { column }
            | Computation::LengthExtrema { column }
            | Computation::DistinctEstimate { column }
            | Computation::DataTypes { column } => write!(f, "({column})")?,
            Computation::PredicateCount { predicate } => write!(f, "({predicate})")?,
            Computation::PatternCount { column, pattern } => write!(f, "({column}, {pattern})")?,
            Computation::Correlation { first, second } => write!(f, "({first}, {second})")?,
            Computation::Quantiles {
                column,
                relative_accuracy,
            } => write!(f, "({column}, {relative_accuracy})")?,
            Computation::Frequencies { columns } => write!(f, "({})", columns.join(","))?,
        }
        if let Some(filter) = &self.filter {
            write!(f, " where {filter}")?;
        }
        Ok(())
    }
}

/// How rows are visited for a set of descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ScanStrategy {
    /// Single-pass accumulators, any number per pass.
    Aggregation,
    /// Frequency table over the grouping columns.
    Grouping { columns: Vec<String> },
}

/// Descriptors with the same shape are computed in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanShape {
    pub strategy: ScanStrategy,
    pub filter: Option<String>,
}

impl fmt::Display for ScanShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.strategy {
            ScanStrategy::Aggregation => write!(f, "aggregation")?,
            ScanStrategy::Grouping { columns } => write!(f, "grouping({})", columns.join(","))?,
        }
        if let Some(filter) = &self.filter {
            write!(f, " where {filter}")?;
        }
        Ok(())
    }
}
