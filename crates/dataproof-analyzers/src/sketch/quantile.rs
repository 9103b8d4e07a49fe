use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RELATIVE_ACCURACY: f64 = 0.01;

/// Relative-error quantile sketch with logarithmic buckets.
///
/// A value `x > 0` lands in bucket `ceil(ln x / ln gamma)` where
/// `gamma = (1 + a) / (1 - a)`; negative values use a mirrored bucket map
/// and zeros are counted apart. Buckets are never collapsed, so every
/// estimate is within relative accuracy `a` of a value of the requested
/// rank. Merging adds bucket counts, which makes it exact and order free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileSketch {
    relative_accuracy: f64,
    #[serde(default)]
    positive: BTreeMap<i32, u64>,
    #[serde(default)]
    negative: BTreeMap<i32, u64>,
    #[serde(default)]
    zero_count: u64,
    #[serde(default)]
    count: u64,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl QuantileSketch {
    /// `relative_accuracy` must lie in `(0, 1)`; analyzers check this as a
    /// precondition before a sketch is ever built.
    pub fn new(relative_accuracy: f64) -> Self {
        Self {
            relative_accuracy,
            positive: BTreeMap::new(),
            negative: BTreeMap::new(),
            zero_count: 0,
            count: 0,
            min: None,
            max: None,
        }
    }

    pub fn relative_accuracy(&self) -> f64 {
        self.relative_accuracy
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn gamma(&self) -> f64 {
        (1.0 + self.relative_accuracy) / (1.0 - self.relative_accuracy)
    }

    fn key(&self, magnitude: f64) -> i32 {
        (magnitude.ln() / self.gamma().ln()).ceil() as i32
    }

    fn bucket_value(&self, key: i32) -> f64 {
        let gamma = self.gamma();
        2.0 * gamma.powi(key) / (gamma + 1.0)
    }

    /// Non-finite values are ignored.
    pub fn insert(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if value > 0.0 {
            let key = self.key(value);
            *self.positive.entry(key).or_insert(0) += 1;
        } else if value < 0.0 {
            let key = self.key(-value);
            *self.negative.entry(key).or_insert(0) += 1;
        } else {
            self.zero_count += 1;
        }
        self.count += 1;
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.relative_accuracy.to_bits() == other.relative_accuracy.to_bits()
    }

    /// `None` when the sketches were built with different accuracies.
    pub fn merge(&self, other: &Self) -> Option<Self> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut merged = self.clone();
        for (key, count) in &other.positive {
            *merged.positive.entry(*key).or_insert(0) += count;
        }
        for (key, count) in &other.negative {
            *merged.negative.entry(*key).or_insert(0) += count;
        }
        merged.zero_count += other.zero_count;
        merged.count += other.count;
        merged.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        merged.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        Some(merged)
    }

    /// Estimate the value at rank `floor(q * (count - 1))`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        let (min, max) = (self.min?, self.max?);
        let rank = (q * (self.count - 1) as f64).floor() as u64;
        if rank == 0 {
            return Some(min);
        }
        if rank + 1 >= self.count {
            return Some(max);
        }
        let clamp = |value: f64| value.clamp(min, max);

        let mut seen = 0u64;
        for (key, count) in self.negative.iter().rev() {
            seen += count;
            if seen > rank {
                return Some(clamp(-self.bucket_value(*key)));
            }
        }
        seen += self.zero_count;
        if seen > rank {
            return Some(clamp(0.0));
        }
        for (key, count) in &self.positive {
            seen += count;
            if seen > rank {
                return Some(clamp(self.bucket_value(*key)));
            }
        }
        Some(max)
    }
}
