//! Buffer handlers: named reductions from buffered frames to one frame.
//!
//! A handler is a pure function over the buffered frames, oldest first. Every
//! built-in handler stacks the rows of all frames and collapses them to a single
//! row, so the output is always `1 x channels` whatever the buffer depth or the
//! number of sub-acquisitions per frame.
//!
//! Handlers are looked up by the name stored in the configuration file. The
//! lookup happens once at load time so an unknown name stops the process before
//! the device is touched.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AppResult, DaqError};
use crate::hardware::Frame;

/// Signature of a reduction over buffered frames (oldest first).
pub type ReduceFn = fn(&[ArrayView2<'_, f64>]) -> AppResult<Frame>;

/// Name of the handler used when none is configured.
pub const DEFAULT_HANDLER: &str = "average";

/// A resolved buffer handler.
#[derive(Clone)]
pub struct BufferHandler {
    name: String,
    reduce: ReduceFn,
}

impl BufferHandler {
    /// Wrap a reduction under a name.
    pub fn new(name: impl Into<String>, reduce: ReduceFn) -> Self {
        Self {
            name: name.into(),
            reduce,
        }
    }

    /// Registered name of this handler.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the reduction.
    pub fn apply(&self, frames: &[ArrayView2<'_, f64>]) -> AppResult<Frame> {
        (self.reduce)(frames)
    }
}

impl fmt::Debug for BufferHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHandler")
            .field("name", &self.name)
            .finish()
    }
}

/// Registry of buffer handlers keyed by name.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, ReduceFn>,
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in handlers.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("average", average);
        registry.register("sum", sum);
        registry.register("median", median);
        registry.register("max", max);
        registry.register("latest", latest);
        registry
    }

    /// Add or replace a handler.
    pub fn register(&mut self, name: impl Into<String>, reduce: ReduceFn) {
        self.handlers.insert(name.into(), reduce);
    }

    /// Whether a handler with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Look up a handler by name.
    pub fn resolve(&self, name: &str) -> AppResult<BufferHandler> {
        self.handlers
            .get(name)
            .map(|reduce| BufferHandler::new(name, *reduce))
            .ok_or_else(|| DaqError::UnknownBufferHandler {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Stack every row of every frame into one `rows x channels` array.
fn stack_rows(frames: &[ArrayView2<'_, f64>]) -> AppResult<Array2<f64>> {
    let first = frames.first().ok_or(DaqError::EmptyBuffer)?;
    let expected = first.ncols();
    if let Some(bad) = frames.iter().find(|f| f.ncols() != expected) {
        return Err(DaqError::Shape {
            expected,
            actual: bad.ncols(),
        });
    }
    let stacked = concatenate(Axis(0), frames)
        .map_err(|e| DaqError::Validation(format!("cannot stack frames: {e}")))?;
    if stacked.nrows() == 0 {
        return Err(DaqError::Validation("frames contain no rows".into()));
    }
    Ok(stacked)
}

fn as_single_row(row: ndarray::Array1<f64>) -> Frame {
    row.insert_axis(Axis(0))
}

/// Elementwise mean across all buffered rows.
pub fn average(frames: &[ArrayView2<'_, f64>]) -> AppResult<Frame> {
    let stacked = stack_rows(frames)?;
    stacked
        .mean_axis(Axis(0))
        .map(as_single_row)
        .ok_or_else(|| DaqError::Validation("cannot average zero rows".into()))
}

/// Elementwise sum across all buffered rows.
pub fn sum(frames: &[ArrayView2<'_, f64>]) -> AppResult<Frame> {
    let stacked = stack_rows(frames)?;
    Ok(as_single_row(stacked.sum_axis(Axis(0))))
}

/// Elementwise maximum across all buffered rows.
pub fn max(frames: &[ArrayView2<'_, f64>]) -> AppResult<Frame> {
    let stacked = stack_rows(frames)?;
    Ok(as_single_row(
        stacked.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, v| acc.max(*v)),
    ))
}

/// Elementwise median across all buffered rows.
pub fn median(frames: &[ArrayView2<'_, f64>]) -> AppResult<Frame> {
    let stacked = stack_rows(frames)?;
    let row = stacked.map_axis(Axis(0), |lane| {
        let mut values = lane.to_vec();
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    });
    Ok(as_single_row(row))
}

/// Mean of the rows of the most recent frame only.
pub fn latest(frames: &[ArrayView2<'_, f64>]) -> AppResult<Frame> {
    let last = frames.last().ok_or(DaqError::EmptyBuffer)?;
    average(std::slice::from_ref(last))
}
