//! Metric computation over partitioned datasets.
//!
//! Analyzers declare what they need as [`Descriptor`]s, engines turn
//! descriptors into per-partition [`State`]s, states merge associatively and
//! the [`AnalysisRunner`] folds everything into metrics, optionally
//! combining them with states kept in a [`MetricsRepository`].

pub mod analyzer;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod metric;
pub mod records;
pub mod repository;
pub mod runner;
pub mod sketch;
pub mod state;

pub use analyzer::{Analyzer, NULL_BIN, Patterns};
pub use descriptor::{Computation, Descriptor, Probability, ScanShape, ScanStrategy};
pub use engine::{DescriptorScan, ExecutionEngine, InMemoryEngine, ScanRequest};
pub use error::{ExecutionError, StateError};
pub use metric::{
    Distribution, DistributionValue, Entity, FailureKind, Metric, MetricFailure, MetricRow,
    MetricValue,
};
pub use repository::{
    FileSystemRepository, InMemoryRepository, MetricsRepository, RangeQuery, RepositoryEntry,
    RepositoryError, ResultKey,
};
pub use runner::{AnalysisOptions, AnalysisRunner, AnalyzerContext, RunnerError};
pub use state::State;
