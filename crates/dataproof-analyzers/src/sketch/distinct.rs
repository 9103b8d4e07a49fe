use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const DEFAULT_PRECISION: u8 = 12;

/// HyperLogLog cardinality estimator.
///
/// Each value is hashed with SHA-256 and the first 8 bytes feed `2^p`
/// registers. Merging takes the register-wise maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinctSketch {
    precision: u8,
    #[serde(serialize_with = "encode_registers", deserialize_with = "decode_registers")]
    registers: Vec<u8>,
}

impl DistinctSketch {
    pub fn new(precision: u8) -> Self {
        let precision = precision.clamp(4, 18);
        Self {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn insert(&mut self, value: &str) {
        let digest = Sha256::digest(value.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let hash = u64::from_be_bytes(prefix);

        let precision = u32::from(self.precision);
        let index = (hash >> (64 - precision)) as usize;
        let remainder = hash << precision;
        let rank = (remainder.leading_zeros() + 1).min(64 - precision + 1) as u8;
        if let Some(register) = self.registers.get_mut(index) {
            *register = (*register).max(rank);
        }
    }

    /// `None` when the sketches use different precisions.
    pub fn merge(&self, other: &Self) -> Option<Self> {
        if self.precision != other.precision || self.registers.len() != other.registers.len() {
            return None;
        }
        let registers = self
            .registers
            .iter()
            .zip(&other.registers)
            .map(|(a, b)| *a.max(b))
            .collect();
        Some(Self {
            precision: self.precision,
            registers,
        })
    }

    pub fn estimate(&self) -> f64 {
        let m = self.registers.len() as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);
        let sum: f64 = self
            .registers
            .iter()
            .map(|register| 2f64.powi(-i32::from(*register)))
            .sum();
        let raw = alpha * m * m / sum;
        let zeros = self.registers.iter().filter(|register| **register == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }
}

fn encode_registers<S: Serializer>(registers: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(registers))
}

fn decode_registers<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    hex::decode(encoded).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sketch_of(range: std::ops::Range<u32>) -> DistinctSketch {
        let mut sketch = DistinctSketch::new(DEFAULT_PRECISION);
        for value in range {
            sketch.insert(&value.to_string());
        }
        sketch
    }

    #[test]
    fn empty_sketch_estimates_zero() {
        assert_eq!(DistinctSketch::new(DEFAULT_PRECISION).estimate(), 0.0);
    }

    #[test]
    fn small_cardinalities_are_close() {
        let estimate = sketch_of(0..100).estimate();
        assert!((estimate - 100.0).abs() <= 5.0, "estimate {estimate}");
    }

    #[test]
    fn large_cardinalities_stay_within_error() {
        let estimate = sketch_of(0..20_000).estimate();
        let error = (estimate - 20_000.0).abs() / 20_000.0;
        assert!(error < 0.05, "estimate {estimate}");
    }

    #[test]
    fn duplicates_do_not_count() {
        let mut sketch = sketch_of(0..50);
        for value in 0..50 {
            sketch.insert(&value.to_string());
        }
        assert_eq!(sketch, sketch_of(0..50));
    }

    #[test]
    fn merge_equals_union() {
        let merged = sketch_of(0..300).merge(&sketch_of(200..600)).expect("same precision");
        assert_eq!(merged, sketch_of(0..600));
    }

    #[test]
    fn registers_serialize_as_hex() {
        let sketch = sketch_of(0..10);
        let json = serde_json::to_string(&sketch).expect("serialize");
        let back: DistinctSketch = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, sketch);
        assert!(json.contains("\"registers\":\""));
    }
}
