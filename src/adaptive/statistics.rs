use crate::multiindex::MultiIndex;
use log::warn;
use serde::{Deserialize, Serialize};

/// Wall-clock durations of the phases of one iteration, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub pcg: f64,
    pub tail: f64,
    pub residual: f64,
    pub mark_residual: f64,
    pub refine_residual: f64,
    pub mark_tail: f64,
    pub refine_tail: f64,
    pub refine_oscillation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStatistics<T> {
    pub iteration: usize,
    pub pcg_iterations: usize,
    pub pcg_zeta: T,
    pub pcg_converged: bool,
    /// `||b - A w||` of the returned iterate.
    pub residual_norm: T,
    /// The overall estimate `ξ`.
    pub error_estimate: T,
    pub error_residual: T,
    pub error_tail: T,
    pub dofs: usize,
    pub cells: usize,
    pub active_indices: Vec<MultiIndex>,
    pub dim: Vec<(MultiIndex, usize)>,
    pub marked_cells: usize,
    pub marked_indices: usize,
    pub timings: Timings,
}

/// The position of a run: the next iteration to carry out, or whether the run has finished.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub iteration: usize,
    pub done: bool,
}

/// Per-iteration statistics of an adaptive run, in iteration order.
///
/// The history can be persisted and passed back to the adaptive solver, which then resumes at
/// [`Cursor::iteration`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory<T> {
    records: Vec<IterationStatistics<T>>,
    cursor: Cursor,
}

impl<T> Default for RunHistory<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            cursor: Cursor::default(),
        }
    }
}

impl<T> RunHistory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[IterationStatistics<T>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&IterationStatistics<T>> {
        self.records.last()
    }

    pub fn get(&self, iteration: usize) -> Option<&IterationStatistics<T>> {
        self.records
            .iter()
            .find(|record| record.iteration == iteration)
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor.done
    }

    /// Appends the record of an iteration.
    ///
    /// Returns `false` and keeps the existing record if the iteration was already recorded.
    pub fn record(&mut self, statistics: IterationStatistics<T>) -> bool {
        if self.get(statistics.iteration).is_some() {
            warn!(
                "Statistics for iteration {} already recorded, ignoring duplicate",
                statistics.iteration
            );
            return false;
        }
        self.records.push(statistics);
        true
    }

    /// Moves the cursor to the next iteration to carry out.
    pub fn advance(&mut self, next_iteration: usize) {
        self.cursor.iteration = next_iteration;
    }

    pub fn finish(&mut self) {
        self.cursor.done = true;
    }
}
