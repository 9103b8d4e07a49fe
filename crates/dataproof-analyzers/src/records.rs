//! Serde adapters for values JSON cannot spell directly.
//!
//! JSON objects only take string keys, so analyzer and descriptor maps are
//! written as arrays of records. JSON numbers have no infinities or NaN, so
//! accumulator floats write those as the strings `"inf"`, `"-inf"` and
//! `"NaN"`.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::analyzer::Analyzer;
use crate::descriptor::Descriptor;
use crate::metric::Metric;
use crate::state::State;

#[derive(Serialize)]
struct MetricRecordRef<'a> {
    analyzer: &'a Analyzer,
    metric: &'a Metric,
}

#[derive(Deserialize)]
struct MetricRecord {
    analyzer: Analyzer,
    metric: Metric,
}

#[derive(Serialize)]
struct StateRecordRef<'a> {
    descriptor: &'a Descriptor,
    state: &'a State,
}

#[derive(Deserialize)]
struct StateRecord {
    descriptor: Descriptor,
    state: State,
}

pub mod metrics {
    use super::*;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Analyzer, Metric>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            map.iter()
                .map(|(analyzer, metric)| MetricRecordRef { analyzer, metric }),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Analyzer, Metric>, D::Error> {
        let records = Vec::<MetricRecord>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|record| (record.analyzer, record.metric))
            .collect())
    }
}

pub mod states {
    use super::*;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<Descriptor, State>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            map.iter()
                .map(|(descriptor, state)| StateRecordRef { descriptor, state }),
        )
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Descriptor, State>, D::Error> {
        let records = Vec::<StateRecord>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|record| (record.descriptor, record.state))
            .collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FloatRecord {
    Number(f64),
    Label(String),
}

impl FloatRecord {
    fn into_f64(self) -> Result<f64, String> {
        match self {
            FloatRecord::Number(value) => Ok(value),
            FloatRecord::Label(label) => match label.as_str() {
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                "NaN" => Ok(f64::NAN),
                other => Err(format!("invalid float '{other}'")),
            },
        }
    }
}

fn non_finite_label(value: f64) -> Option<&'static str> {
    if value.is_nan() {
        Some("NaN")
    } else if value == f64::INFINITY {
        Some("inf")
    } else if value == f64::NEG_INFINITY {
        Some("-inf")
    } else {
        None
    }
}

pub mod float {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        match non_finite_label(*value) {
            Some(label) => serializer.serialize_str(label),
            None => serializer.serialize_f64(*value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        FloatRecord::deserialize(deserializer)?
            .into_f64()
            .map_err(D::Error::custom)
    }
}

pub mod optional_float {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => float::serialize(value, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        Option::<FloatRecord>::deserialize(deserializer)?
            .map(FloatRecord::into_f64)
            .transpose()
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "float")]
        value: f64,
        #[serde(default, with = "optional_float")]
        bound: Option<f64>,
    }

    #[test]
    fn non_finite_floats_are_written_as_labels() {
        let json = serde_json::to_string(&Sample {
            value: f64::NEG_INFINITY,
            bound: Some(f64::INFINITY),
        })
        .expect("encode");
        assert_eq!(json, r#"{"value":"-inf","bound":"inf"}"#);

        let decoded: Sample = serde_json::from_str(r#"{"value":"NaN"}"#).expect("decode");
        assert!(decoded.value.is_nan());
        assert_eq!(decoded.bound, None);
    }

    #[test]
    fn finite_floats_stay_numbers() {
        let sample = Sample {
            value: 0.1 + 0.2,
            bound: Some(-1e300),
        };
        let json = serde_json::to_string(&sample).expect("encode");
        assert!(json.starts_with(r#"{"value":0.30000000000000004,"#));
        let decoded: Sample = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded, sample);

        let integral: Sample =
            serde_json::from_str(r#"{"value":3,"bound":null}"#).expect("decode");
        assert_eq!(integral.value, 3.0);
        assert!(serde_json::from_str::<Sample>(r#"{"value":"infinity"}"#).is_err());
    }
}
