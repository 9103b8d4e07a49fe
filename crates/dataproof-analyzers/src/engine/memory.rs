use std::collections::HashMap;

use rayon::prelude::*;
use regex::Regex;
use tracing::debug;

use dataproof_core::{Dataset, Schema, Table, Value};

use super::predicate::{Predicate, RowContext};
use super::{DescriptorScan, ExecutionEngine, ScanRequest};
use crate::descriptor::{Computation, Descriptor};
use crate::error::ExecutionError;
use crate::sketch::{DEFAULT_PRECISION, DistinctSketch, QuantileSketch};
use crate::state::{
    CorrelationState, CountState, DataTypeState, ExtremaState, FrequencyState, MomentsState,
    RatioState, State,
};

/// Engine over [`Table`], scanning partitions on the rayon pool.
#[derive(Debug, Clone)]
pub struct InMemoryEngine {
    partitions: usize,
}

impl InMemoryEngine {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new(rayon::current_num_threads())
    }
}

impl ExecutionEngine for InMemoryEngine {
    type Data = Table;

    fn scan_partitions(
        &self,
        table: &Table,
        request: &ScanRequest<'_>,
    ) -> Result<Vec<DescriptorScan>, ExecutionError> {
        let plan = ScanPlan::compile(table.schema(), request)?;
        let partitions = table.partitions(self.partitions);
        debug!(
            shape = %request.shape,
            descriptors = request.descriptors.len(),
            rejected = plan.rejected(),
            partitions = partitions.len(),
            "scanning table"
        );
        let scanned: Vec<Vec<State>> = partitions
            .par_iter()
            .map(|rows| plan.scan(rows))
            .collect();
        Ok(plan.distribute(scanned))
    }
}

/// Descriptors resolved against a schema, ready to be fed rows.
struct ScanPlan {
    columns: HashMap<String, usize>,
    filter: Option<Predicate>,
    /// One slot per requested descriptor; `None` when it compiled.
    rejections: Vec<Option<ExecutionError>>,
    accumulators: Vec<Accumulator>,
}

impl ScanPlan {
    fn compile(schema: &Schema, request: &ScanRequest<'_>) -> Result<Self, ExecutionError> {
        let columns: HashMap<String, usize> = schema
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.name.to_lowercase(), idx))
            .collect();

        let filter = match &request.shape.filter {
            Some(expression) => Some(compile_predicate(expression, &columns)?),
            None => None,
        };

        let mut rejections = Vec::with_capacity(request.descriptors.len());
        let mut accumulators = Vec::with_capacity(request.descriptors.len());
        for descriptor in request.descriptors {
            match Accumulator::compile(descriptor, &columns) {
                Ok(accumulator) => {
                    accumulators.push(accumulator);
                    rejections.push(None);
                }
                Err(err) => {
                    debug!(descriptor = %descriptor, error = %err, "descriptor rejected");
                    rejections.push(Some(err));
                }
            }
        }

        Ok(Self {
            columns,
            filter,
            rejections,
            accumulators,
        })
    }

    fn rejected(&self) -> usize {
        self.rejections.iter().filter(|slot| slot.is_some()).count()
    }

    fn scan(&self, rows: &[Vec<Value>]) -> Vec<State> {
        let mut accumulators = self.accumulators.clone();
        for row in rows {
            let ctx = RowContext::new(&self.columns, row);
            if let Some(filter) = &self.filter {
                if !filter.matches(&ctx) {
                    continue;
                }
            }
            for accumulator in &mut accumulators {
                accumulator.observe(&ctx);
            }
        }
        accumulators.into_iter().map(Accumulator::into_state).collect()
    }

    /// Turn partition-major states of the compiled accumulators into one
    /// slot per requested descriptor.
    fn distribute(&self, scanned: Vec<Vec<State>>) -> Vec<DescriptorScan> {
        let mut by_accumulator: Vec<Vec<State>> =
            vec![Vec::with_capacity(scanned.len()); self.accumulators.len()];
        for states in scanned {
            for (slot, state) in by_accumulator.iter_mut().zip(states) {
                slot.push(state);
            }
        }
        let mut by_accumulator = by_accumulator.into_iter();
        self.rejections
            .iter()
            .map(|rejection| match rejection {
                Some(err) => Err(err.clone()),
                None => Ok(by_accumulator.next().unwrap_or_default()),
            })
            .collect()
    }
}

fn compile_predicate(
    expression: &str,
    columns: &HashMap<String, usize>,
) -> Result<Predicate, ExecutionError> {
    let predicate = Predicate::parse(expression)?;
    if let Some(missing) = predicate
        .columns()
        .into_iter()
        .find(|column| !columns.contains_key(*column))
    {
        return Err(ExecutionError::UnknownColumn(missing.to_string()));
    }
    Ok(predicate)
}

fn resolve(column: &str, columns: &HashMap<String, usize>) -> Result<usize, ExecutionError> {
    columns
        .get(&column.to_lowercase())
        .copied()
        .ok_or_else(|| ExecutionError::UnknownColumn(column.to_string()))
}

static NULL: Value = Value::Null;

/// Per-descriptor running state together with the columns it reads.
#[derive(Clone)]
enum Accumulator {
    RowCount(CountState),
    NonNull(usize, RatioState),
    Predicate(Predicate, RatioState),
    Pattern(usize, Regex, RatioState),
    Moments(usize, MomentsState),
    Extrema(usize, ExtremaState),
    LengthExtrema(usize, ExtremaState),
    Correlation(usize, usize, CorrelationState),
    Quantiles(usize, QuantileSketch),
    Distinct(usize, DistinctSketch),
    Frequencies(Vec<usize>, FrequencyState),
    DataTypes(usize, DataTypeState),
}

impl Accumulator {
    fn compile(
        descriptor: &Descriptor,
        columns: &HashMap<String, usize>,
    ) -> Result<Self, ExecutionError> {
        let accumulator = match &descriptor.computation {
            Computation::RowCount => Accumulator::RowCount(CountState::default()),
            Computation::NonNullCount { column } => {
                Accumulator::NonNull(resolve(column, columns)?, RatioState::default())
            }
            Computation::PredicateCount { predicate } => Accumulator::Predicate(
                compile_predicate(predicate, columns)?,
                RatioState::default(),
            ),
            Computation::PatternCount { column, pattern } => {
                let regex = Regex::new(pattern).map_err(|err| ExecutionError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: err.to_string(),
                })?;
                Accumulator::Pattern(resolve(column, columns)?, regex, RatioState::default())
            }
            Computation::Moments { column } => {
                Accumulator::Moments(resolve(column, columns)?, MomentsState::default())
            }
            Computation::Extrema { column } => {
                Accumulator::Extrema(resolve(column, columns)?, ExtremaState::default())
            }
            Computation::LengthExtrema { column } => {
                Accumulator::LengthExtrema(resolve(column, columns)?, ExtremaState::default())
            }
            Computation::Correlation { first, second } => Accumulator::Correlation(
                resolve(first, columns)?,
                resolve(second, columns)?,
                CorrelationState::default(),
            ),
            Computation::Quantiles {
                column,
                relative_accuracy,
            } => Accumulator::Quantiles(
                resolve(column, columns)?,
                QuantileSketch::new(relative_accuracy.value()),
            ),
            Computation::DistinctEstimate { column } => Accumulator::Distinct(
                resolve(column, columns)?,
                DistinctSketch::new(DEFAULT_PRECISION),
            ),
            Computation::Frequencies { columns: grouping } => Accumulator::Frequencies(
                grouping
                    .iter()
                    .map(|column| resolve(column, columns))
                    .collect::<Result<Vec<_>, _>>()?,
                FrequencyState::default(),
            ),
            Computation::DataTypes { column } => {
                Accumulator::DataTypes(resolve(column, columns)?, DataTypeState::default())
            }
        };
        Ok(accumulator)
    }

    fn observe(&mut self, ctx: &RowContext<'_>) {
        let cell = |idx: usize| ctx.row.get(idx).unwrap_or(&NULL);
        match self {
            Accumulator::RowCount(state) => state.rows += 1,
            Accumulator::NonNull(idx, state) => state.observe(!cell(*idx).is_null()),
            Accumulator::Predicate(predicate, state) => state.observe(predicate.matches(ctx)),
            Accumulator::Pattern(idx, regex, state) => {
                // Nulls count as rows that do not match.
                let matched = cell(*idx).as_str().is_some_and(|text| regex.is_match(text));
                state.observe(matched);
            }
            Accumulator::Moments(idx, state) => {
                if let Some(value) = cell(*idx).as_f64() {
                    state.observe(value);
                }
            }
            Accumulator::Extrema(idx, state) => {
                if let Some(value) = cell(*idx).as_f64() {
                    state.observe(value);
                }
            }
            Accumulator::LengthExtrema(idx, state) => {
                if let Some(text) = cell(*idx).as_str() {
                    state.observe(text.chars().count() as f64);
                }
            }
            Accumulator::Correlation(first, second, state) => {
                if let (Some(x), Some(y)) = (cell(*first).as_f64(), cell(*second).as_f64()) {
                    state.observe(x, y);
                }
            }
            Accumulator::Quantiles(idx, sketch) => {
                if let Some(value) = cell(*idx).as_f64() {
                    sketch.insert(value);
                }
            }
            Accumulator::Distinct(idx, sketch) => {
                let value = cell(*idx);
                if !value.is_null() {
                    sketch.insert(&value.render());
                }
            }
            Accumulator::Frequencies(indices, state) => {
                let values: Vec<&Value> = indices.iter().map(|idx| cell(*idx)).collect();
                if values.iter().any(|value| value.is_null()) {
                    state.observe(None);
                } else {
                    let rendered: Vec<String> = values.iter().map(|value| value.render()).collect();
                    state.observe(Some(FrequencyState::key_for(&rendered)));
                }
            }
            Accumulator::DataTypes(idx, state) => state.observe(cell(*idx)),
        }
    }

    fn into_state(self) -> State {
        match self {
            Accumulator::RowCount(state) => State::Count(state),
            Accumulator::NonNull(_, state)
            | Accumulator::Predicate(_, state)
            | Accumulator::Pattern(_, _, state) => State::Ratio(state),
            Accumulator::Moments(_, state) => State::Moments(state),
            Accumulator::Extrema(_, state) | Accumulator::LengthExtrema(_, state) => {
                State::Extrema(state)
            }
            Accumulator::Correlation(_, _, state) => State::Correlation(state),
            Accumulator::Quantiles(_, sketch) => State::Quantiles(sketch),
            Accumulator::Distinct(_, sketch) => State::Distinct(sketch),
            Accumulator::Frequencies(_, state) => State::Frequencies(state),
            Accumulator::DataTypes(_, state) => State::DataTypes(state),
        }
    }
}
