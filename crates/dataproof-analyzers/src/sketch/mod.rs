//! Mergeable approximate summaries.

pub mod distinct;
pub mod quantile;

pub use distinct::{DEFAULT_PRECISION, DistinctSketch};
pub use quantile::{DEFAULT_RELATIVE_ACCURACY, QuantileSketch};
