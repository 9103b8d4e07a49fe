use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What a metric describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Dataset,
    Column,
    Multicolumn,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Entity::Dataset => "Dataset",
            Entity::Column => "Column",
            Entity::Multicolumn => "Multicolumn",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistributionValue {
    pub absolute: u64,
    pub ratio: f64,
}

/// Binned counts, as produced by histograms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub values: BTreeMap<String, DistributionValue>,
    pub number_of_bins: u64,
}

impl Distribution {
    pub fn get(&self, bin: &str) -> Option<&DistributionValue> {
        self.values.get(bin)
    }

    /// Ratio of a bin, zero when the bin is absent.
    pub fn ratio_of(&self, bin: &str) -> f64 {
        self.values.get(bin).map_or(0.0, |value| value.ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Double(#[serde(with = "crate::records::float")] f64),
    Long(i64),
    Distribution(Distribution),
}

impl MetricValue {
    /// Scalar view of the value; distributions have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Double(value) => Some(*value),
            MetricValue::Long(value) => Some(*value as f64),
            MetricValue::Distribution(_) => None,
        }
    }

    pub fn as_distribution(&self) -> Option<&Distribution> {
        match self {
            MetricValue::Distribution(distribution) => Some(distribution),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Double(value) => write!(f, "{value}"),
            MetricValue::Long(value) => write!(f, "{value}"),
            MetricValue::Distribution(distribution) => {
                write!(f, "distribution({} bins)", distribution.number_of_bins)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The analyzer cannot run against this schema.
    PreconditionViolation,
    /// The scan or the state merge failed.
    AnalysisError,
    /// The metric is undefined for the data seen, e.g. a mean of no rows.
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl MetricFailure {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::PreconditionViolation,
            message: message.into(),
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::AnalysisError,
            message: message.into(),
        }
    }

    pub fn insufficient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::InsufficientData,
            message: message.into(),
        }
    }
}

impl fmt::Display for MetricFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::PreconditionViolation => "precondition violation",
            FailureKind::AnalysisError => "analysis error",
            FailureKind::InsufficientData => "insufficient data",
        };
        write!(f, "{kind}: {}", self.message)
    }
}

/// Outcome of one analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub entity: Entity,
    pub instance: String,
    pub name: String,
    pub value: Result<MetricValue, MetricFailure>,
}

impl Metric {
    pub fn is_success(&self) -> bool {
        self.value.is_ok()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_ref().ok().and_then(MetricValue::as_f64)
    }

    pub fn failure(&self) -> Option<&MetricFailure> {
        self.value.as_ref().err()
    }

    /// Flatten into scalar rows; distributions expand to one row per bin.
    pub fn rows(&self) -> Vec<MetricRow> {
        let row = |name: String, value: f64| MetricRow {
            entity: self.entity,
            instance: self.instance.clone(),
            name,
            value,
        };
        match &self.value {
            Ok(MetricValue::Distribution(distribution)) => {
                let mut rows = vec![row(
                    format!("{}.bins", self.name),
                    distribution.number_of_bins as f64,
                )];
                for (bin, value) in &distribution.values {
                    rows.push(row(
                        format!("{}.abs.{bin}", self.name),
                        value.absolute as f64,
                    ));
                    rows.push(row(format!("{}.ratio.{bin}", self.name), value.ratio));
                }
                rows
            }
            Ok(value) => value
                .as_f64()
                .map(|value| vec![row(self.name.clone(), value)])
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

/// One scalar line of a metrics table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub entity: Entity,
    pub instance: String,
    pub name: String,
    #[serde(with = "crate::records::float")]
    pub value: f64,
}
