use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Unique per-record identifier, assigned once during ingestion and used as
/// the join key between a coordinate's local records and externally computed
/// residual scores.
pub type SampleId = u64;

/// Monotonically increasing, collision-free source of [`SampleId`]s.
///
/// One generator is shared across all ingestion calls belonging to a single
/// training run, so ids stay unique even when the run ingests several record
/// sources.
#[derive(Debug)]
pub struct SampleIdGenerator {
    next: AtomicU64,
}

impl SampleIdGenerator {
    pub fn new(start: SampleId) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn next_id(&self) -> SampleId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SampleIdGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Error raised when a coefficient vector fails validation.
#[derive(Error, Debug)]
pub enum CoefficientsError {
    #[error(
        "coefficient vector contains non-finite components: {}",
        format_non_finite(.entries)
    )]
    NonFiniteComponents { entries: Vec<(usize, f64)> },
}

fn format_non_finite(entries: &[(usize, f64)]) -> String {
    entries
        .iter()
        .map(|(index, value)| format!("[{index}]={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// An immutable vector of learned model weights, indexed identically to the
/// feature vectors it scores against.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coefficients(pub Array1<f64>);

impl Coefficients {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    pub fn into_inner(self) -> Array1<f64> {
        self.0
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// Scans every component and fails with an error listing each non-finite
    /// index/value pair. A no-op on an all-finite vector.
    pub fn validate(&self) -> Result<(), CoefficientsError> {
        let entries: Vec<(usize, f64)> = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_finite())
            .map(|(i, v)| (i, *v))
            .collect();
        if entries.is_empty() {
            Ok(())
        } else {
            Err(CoefficientsError::NonFiniteComponents { entries })
        }
    }
}

impl Deref for Coefficients {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Array1<f64>> for Coefficients {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<Coefficients> for Array1<f64> {
    fn from(values: Coefficients) -> Self {
        values.0
    }
}
