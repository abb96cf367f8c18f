//! Uniform time series.
//!
//! A series starts at `start` and holds one value per `step`-second
//! interval; row `k` is stamped at the interval end, `start + (k + 1) * step`.

use std::fmt;

use thiserror::Error;

use super::time::to_mjd;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeriesError {
    #[error("step must be positive, got {0}s")]
    InvalidStep(i64),

    #[error("step mismatch: series uses {expected}s, window uses {found}s")]
    StepMismatch { expected: i64, found: i64 },

    #[error("window starting at {start} is not aligned to the {step}s grid starting at {origin}")]
    Misaligned { origin: i64, start: i64, step: i64 },

    #[error("window [{start}, {end}] lies outside the known range [{known_start}, {known_end}]")]
    OutOfRange {
        start: i64,
        end: i64,
        known_start: i64,
        known_end: i64,
    },

    #[error("columns disagree on the time axis")]
    ColumnAxisMismatch,

    #[error("column {index} out of bounds for {width} columns")]
    ColumnOutOfBounds { index: usize, width: usize },

    #[error("row {row} has {found} columns, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Values a series can carry; gaps are filled with NaN-shaped placeholders.
pub trait SeriesValue: Clone + fmt::Debug + PartialEq {
    fn missing_like(&self) -> Self;

    /// Number of columns one row carries.
    fn row_width(&self) -> usize;
}

impl SeriesValue for f64 {
    fn missing_like(&self) -> Self {
        f64::NAN
    }

    fn row_width(&self) -> usize {
        1
    }
}

impl SeriesValue for Vec<f64> {
    fn missing_like(&self) -> Self {
        vec![f64::NAN; self.len()]
    }

    fn row_width(&self) -> usize {
        self.len()
    }
}

/// Every row must be as wide as the first one.
fn check_rows<T: SeriesValue>(values: &[T], expected: Option<usize>) -> Result<(), SeriesError> {
    let Some(expected) = expected.or_else(|| values.first().map(SeriesValue::row_width)) else {
        return Ok(());
    };
    match values
        .iter()
        .enumerate()
        .find(|(_, value)| value.row_width() != expected)
    {
        Some((row, value)) => Err(SeriesError::RaggedRows {
            row,
            expected,
            found: value.row_width(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series<T> {
    start: i64,
    step: i64,
    values: Vec<T>,
}

pub type Series0D = Series<f64>;
pub type Series1D = Series<Vec<f64>>;

impl<T: SeriesValue> Series<T> {
    pub fn new(start: i64, step: i64, values: Vec<T>) -> Result<Self, SeriesError> {
        if step <= 0 {
            return Err(SeriesError::InvalidStep(step));
        }
        check_rows(&values, None)?;
        Ok(Self {
            start,
            step,
            values,
        })
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.start + self.values.len() as i64 * self.step
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Interval-end stamps in unix seconds.
    pub fn times(&self) -> Vec<i64> {
        (1..=self.values.len() as i64)
            .map(|k| self.start + k * self.step)
            .collect()
    }

    pub fn times_mjd(&self) -> Vec<f64> {
        self.times().into_iter().map(to_mjd).collect()
    }

    fn check_grid(&self, start: i64, step: i64) -> Result<(), SeriesError> {
        if step != self.step {
            return Err(SeriesError::StepMismatch {
                expected: self.step,
                found: step,
            });
        }
        if (start - self.start).rem_euclid(self.step) != 0 {
            return Err(SeriesError::Misaligned {
                origin: self.start,
                start,
                step: self.step,
            });
        }
        Ok(())
    }

    /// Insert `window` into this series, overwriting overlap and extending
    /// the axis where the window reaches beyond it. Steps between the two
    /// ranges that neither covers become NaN.
    pub fn merge(&self, window: &Series<T>) -> Result<Series<T>, SeriesError> {
        self.check_grid(window.start, window.step)?;
        if window.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(window.clone());
        }
        check_rows(&window.values, Some(self.values[0].row_width()))?;

        let start = self.start.min(window.start);
        let end = self.end().max(window.end());
        let len = ((end - start) / self.step) as usize;
        let template = window.values[0].missing_like();
        let mut values = vec![template; len];

        let own_offset = ((self.start - start) / self.step) as usize;
        values[own_offset..own_offset + self.len()].clone_from_slice(&self.values);
        let window_offset = ((window.start - start) / self.step) as usize;
        values[window_offset..window_offset + window.len()].clone_from_slice(&window.values);

        Ok(Series {
            start,
            step: self.step,
            values,
        })
    }

    /// Exact sub-range `[start, end]` of this series.
    pub fn restrict(&self, start: i64, end: i64) -> Result<Series<T>, SeriesError> {
        self.check_grid(start, self.step)?;
        if (end - self.start).rem_euclid(self.step) != 0 {
            return Err(SeriesError::Misaligned {
                origin: self.start,
                start: end,
                step: self.step,
            });
        }
        if start < self.start || end > self.end() || end < start {
            return Err(SeriesError::OutOfRange {
                start,
                end,
                known_start: self.start,
                known_end: self.end(),
            });
        }
        let from = ((start - self.start) / self.step) as usize;
        let to = ((end - self.start) / self.step) as usize;
        Ok(Series {
            start,
            step: self.step,
            values: self.values[from..to].to_vec(),
        })
    }
}

impl Series<Vec<f64>> {
    pub fn width(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    pub fn column(&self, index: usize) -> Result<Series0D, SeriesError> {
        let width = self.width();
        if index >= width && !self.is_empty() {
            return Err(SeriesError::ColumnOutOfBounds { index, width });
        }
        Ok(Series {
            start: self.start,
            step: self.step,
            values: self.values.iter().map(|row| row[index]).collect(),
        })
    }

    /// Reassemble a 2-D series from per-column series sharing one axis.
    pub fn from_columns(columns: &[Series0D]) -> Result<Series1D, SeriesError> {
        let Some(first) = columns.first() else {
            return Err(SeriesError::ColumnAxisMismatch);
        };
        if columns.iter().any(|c| {
            c.start != first.start || c.step != first.step || c.len() != first.len()
        }) {
            return Err(SeriesError::ColumnAxisMismatch);
        }
        let values = (0..first.len())
            .map(|row| columns.iter().map(|c| c.values[row]).collect())
            .collect();
        Ok(Series {
            start: first.start,
            step: first.step,
            values,
        })
    }
}
