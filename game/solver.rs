//! # Coordinate Solvers
//!
//! The optimizer seam invoked inside a coordinate's `train_model`. The
//! [`CoordinateSolver`] trait is the collaborator contract: it receives the
//! coordinate's current record partition (effective offsets already baked in)
//! and an optional warm-start, and returns new coefficients plus diagnostic
//! tracking info. Failures are opaque to the coordinate, which forwards them
//! unchanged to the driver.
//!
//! [`BfgsSolver`] is the bundled implementation: it minimizes the weighted
//! per-family negative log-likelihood plus an L2 penalty with a BFGS line
//! search. It is deterministic for a fixed dataset and starting point.

use crate::coordinate::CoordinateRecord;
use crate::model::ModelType;
use crate::types::Coefficients;
use crate::vector::FeatureVector;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("coordinate has no records to train on")]
    EmptyDataset,
    #[error(
        "record {id} declares a feature vector of length {found}, but this coordinate optimizes {expected} coefficients"
    )]
    FeatureLengthMismatch {
        expected: usize,
        found: usize,
        id: u64,
    },
    #[error("BFGS optimization failed: {0}")]
    OptimizationFailed(String),
    #[error("objective is not finite at the starting point ({0})")]
    NonFiniteStart(f64),
}

/// Diagnostic tracking info returned alongside a trained model. Opaque to
/// the block-coordinate-descent contract; the driver may log or discard it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimizationTracker {
    pub iterations: usize,
    pub final_objective: f64,
    pub converged: bool,
    pub objective_trace: Vec<f64>,
}

/// The convex-optimizer collaborator a coordinate delegates training to.
pub trait CoordinateSolver: Send + Sync {
    /// Fits coefficients to `records` for the given model family, seeded
    /// from `warm_start` when present and a cold (zero) start otherwise.
    fn solve(
        &self,
        records: &[CoordinateRecord],
        family: ModelType,
        warm_start: Option<&Coefficients>,
    ) -> Result<(Coefficients, OptimizationTracker), SolverError>;
}

/// BFGS minimizer of the weighted per-family negative log-likelihood with an
/// L2 ridge penalty.
#[derive(Clone, Debug)]
pub struct BfgsSolver {
    pub l2_regularization: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BfgsSolver {
    fn default() -> Self {
        Self {
            l2_regularization: 1e-6,
            tolerance: 1e-8,
            max_iterations: 100,
        }
    }
}

impl BfgsSolver {
    /// Weighted objective and gradient at `beta`. Feature lengths are
    /// validated before optimization starts, so the inner loop is infallible.
    fn objective(
        &self,
        records: &[CoordinateRecord],
        family: ModelType,
        beta: &Array1<f64>,
    ) -> (f64, Array1<f64>) {
        let mut cost = 0.0;
        let mut gradient = Array1::<f64>::zeros(beta.len());
        for record in records {
            let eta = predictor(&record.features, beta) + record.effective_offset;
            let weight = record.weight;
            cost += weight * family.unit_loss(record.response, eta);
            let slope = weight * family.unit_loss_gradient(record.response, eta);
            add_scaled(&mut gradient, &record.features, slope);
        }
        let lambda = self.l2_regularization;
        cost += 0.5 * lambda * beta.dot(beta);
        gradient.scaled_add(lambda, beta);
        (cost, gradient)
    }
}

impl CoordinateSolver for BfgsSolver {
    fn solve(
        &self,
        records: &[CoordinateRecord],
        family: ModelType,
        warm_start: Option<&Coefficients>,
    ) -> Result<(Coefficients, OptimizationTracker), SolverError> {
        let first = records.first().ok_or(SolverError::EmptyDataset)?;
        let dimension = warm_start
            .map(|coefficients| coefficients.len())
            .unwrap_or_else(|| first.features.len());
        for record in records {
            if record.features.len() != dimension {
                return Err(SolverError::FeatureLengthMismatch {
                    expected: dimension,
                    found: record.features.len(),
                    id: record.id,
                });
            }
        }

        let initial = match warm_start {
            Some(coefficients) => coefficients.as_view().to_owned(),
            None => Array1::zeros(dimension),
        };

        let (initial_cost, _) = self.objective(records, family, &initial);
        if !initial_cost.is_finite() {
            return Err(SolverError::NonFiniteStart(initial_cost));
        }

        let trace = RefCell::new(Vec::new());
        let cost_and_grad = |beta: &Array1<f64>| -> (f64, Array1<f64>) {
            let (cost, gradient) = self.objective(records, family, beta);
            trace.borrow_mut().push(cost);
            (cost, gradient)
        };

        log::debug!(
            "Solving {} family over {} records ({} coefficients), initial objective {:.6}",
            match family {
                ModelType::Linear => "linear",
                ModelType::Logistic => "logistic",
                ModelType::Poisson => "Poisson",
            },
            records.len(),
            dimension,
            initial_cost
        );

        let BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        } = Bfgs::new(initial, cost_and_grad)
            .with_tolerance(self.tolerance)
            .with_max_iterations(self.max_iterations)
            .run()
            .map_err(|e| SolverError::OptimizationFailed(format!("{e:?}")))?;

        let iterations = iterations as usize;
        let tracker = OptimizationTracker {
            iterations,
            final_objective: final_value,
            converged: iterations < self.max_iterations,
            objective_trace: trace.into_inner(),
        };
        log::debug!(
            "Solver finished in {} iterations, objective {:.6}",
            tracker.iterations,
            tracker.final_objective
        );
        Ok((Coefficients::new(final_point), tracker))
    }
}

/// Linear predictor for prevalidated operands.
fn predictor(features: &FeatureVector, beta: &Array1<f64>) -> f64 {
    match features {
        FeatureVector::Dense(values) => values.dot(beta),
        FeatureVector::Sparse {
            indices, values, ..
        } => indices
            .iter()
            .zip(values)
            .map(|(&index, &value)| value * beta[index])
            .sum(),
    }
}

/// `accumulator += scale * features`, touching only non-zero entries.
fn add_scaled(accumulator: &mut Array1<f64>, features: &FeatureVector, scale: f64) {
    match features {
        FeatureVector::Dense(values) => accumulator.scaled_add(scale, values),
        FeatureVector::Sparse {
            indices, values, ..
        } => {
            for (&index, &value) in indices.iter().zip(values) {
                accumulator[index] += scale * value;
            }
        }
    }
}
