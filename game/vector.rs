//! Dense and sparse feature vectors plus the dot-product scoring primitive.
//!
//! Every scoring path in the crate goes through [`FeatureVector::dot`] or
//! [`FeatureVector::dot_dense`]. Both operands carry an explicit declared
//! length; a length disagreement is a configuration error and fails loudly
//! rather than silently truncating to the shorter vector.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("vector length mismatch: left operand declares {left}, right operand declares {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("sparse vector has {indices} indices but {values} values")]
    IndexValueLengthMismatch { indices: usize, values: usize },
    #[error("sparse index {index} is out of bounds for declared length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("sparse indices must be strictly increasing (violation at position {position})")]
    UnsortedIndices { position: usize },
}

/// A per-shard feature vector in either dense or sparse representation.
///
/// Sparse vectors store strictly increasing indices alongside their values
/// and a declared total length, so the two representations are
/// interchangeable for scoring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FeatureVector {
    Dense(Array1<f64>),
    Sparse {
        len: usize,
        indices: Vec<usize>,
        values: Vec<f64>,
    },
}

impl FeatureVector {
    pub fn dense(values: Array1<f64>) -> Self {
        Self::Dense(values)
    }

    /// Builds a sparse vector, validating the index/value invariants up
    /// front so scoring never has to re-check them.
    pub fn sparse(len: usize, indices: Vec<usize>, values: Vec<f64>) -> Result<Self, VectorError> {
        if indices.len() != values.len() {
            return Err(VectorError::IndexValueLengthMismatch {
                indices: indices.len(),
                values: values.len(),
            });
        }
        for (position, window) in indices.windows(2).enumerate() {
            if window[1] <= window[0] {
                return Err(VectorError::UnsortedIndices {
                    position: position + 1,
                });
            }
        }
        if let Some(&last) = indices.last()
            && last >= len
        {
            return Err(VectorError::IndexOutOfBounds { index: last, len });
        }
        Ok(Self::Sparse {
            len,
            indices,
            values,
        })
    }

    /// The declared length of the vector (not the number of non-zeros).
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(values) => values.len(),
            Self::Sparse { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dot product against a dense operand of matching declared length.
    /// `left` in a mismatch error is always the receiver's declared length.
    pub fn dot_dense(&self, dense: ArrayView1<'_, f64>) -> Result<f64, VectorError> {
        if self.len() != dense.len() {
            return Err(VectorError::DimensionMismatch {
                left: self.len(),
                right: dense.len(),
            });
        }
        Ok(match self {
            Self::Dense(values) => values.dot(&dense),
            Self::Sparse {
                indices, values, ..
            } => indices
                .iter()
                .zip(values)
                .map(|(&index, &value)| value * dense[index])
                .sum(),
        })
    }

    /// Dot product between any two representations.
    pub fn dot(&self, other: &FeatureVector) -> Result<f64, VectorError> {
        if self.len() != other.len() {
            return Err(VectorError::DimensionMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        Ok(match (self, other) {
            (Self::Dense(left), _) => other.dot_dense(left.view())?,
            (_, Self::Dense(right)) => self.dot_dense(right.view())?,
            (
                Self::Sparse {
                    indices: left_indices,
                    values: left_values,
                    ..
                },
                Self::Sparse {
                    indices: right_indices,
                    values: right_values,
                    ..
                },
            ) => {
                // Merge walk over two strictly increasing index lists.
                let mut total = 0.0;
                let mut i = 0;
                let mut j = 0;
                while i < left_indices.len() && j < right_indices.len() {
                    match left_indices[i].cmp(&right_indices[j]) {
                        std::cmp::Ordering::Less => i += 1,
                        std::cmp::Ordering::Greater => j += 1,
                        std::cmp::Ordering::Equal => {
                            total += left_values[i] * right_values[j];
                            i += 1;
                            j += 1;
                        }
                    }
                }
                total
            }
        })
    }
}

impl From<Array1<f64>> for FeatureVector {
    fn from(values: Array1<f64>) -> Self {
        Self::Dense(values)
    }
}
