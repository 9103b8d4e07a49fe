//! Execution engines compute per-partition states for a batch of
//! descriptors that share one scan shape.

pub mod memory;
pub mod predicate;

pub use memory::InMemoryEngine;
pub use predicate::{Predicate, PredicateOutcome, RowContext};

use dataproof_core::Dataset;

use crate::descriptor::{Descriptor, ScanShape};
use crate::error::ExecutionError;
use crate::state::State;

/// Per-partition states of one descriptor.
pub type DescriptorScan = Result<Vec<State>, ExecutionError>;

/// One pass over a dataset.
#[derive(Debug, Clone, Copy)]
pub struct ScanRequest<'a> {
    pub shape: &'a ScanShape,
    pub descriptors: &'a [Descriptor],
}

pub trait ExecutionEngine: Sync {
    type Data: Dataset + ?Sized;

    /// Scan `dataset` once and return, for every requested descriptor in
    /// request order, its per-partition states.
    ///
    /// A descriptor that cannot be computed gets an `Err` slot and leaves
    /// the others untouched; only problems with the shape itself (its
    /// filter) fail the whole request. Rows the filter rejects contribute
    /// to no state. A dataset without partitions yields empty state lists.
    fn scan_partitions(
        &self,
        dataset: &Self::Data,
        request: &ScanRequest<'_>,
    ) -> Result<Vec<DescriptorScan>, ExecutionError>;
}
