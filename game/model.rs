//! # Generalized Linear Models
//!
//! The per-coordinate trained artifact. Every model family wraps an immutable
//! [`Coefficients`] vector and differs only in its inverse link function: the
//! linear predictor is always `dot(coefficients, features)`, and the mean
//! function is the family-specific transform of `score + offset`.
//!
//! Models are immutable; "updating" the coefficients returns a new instance
//! of the same family and leaves the receiver untouched.

use crate::types::{Coefficients, CoefficientsError};
use crate::vector::{FeatureVector, VectorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error(transparent)]
    Coefficients(#[from] CoefficientsError),
}

/// The model-family tag, one per canonical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// Identity link, for continuous outcomes.
    Linear,
    /// Logit link, for binary outcomes.
    Logistic,
    /// Log link, for count outcomes.
    Poisson,
}

impl ModelType {
    /// The family's inverse link: maps a linear predictor to a mean.
    ///
    /// `eta` is clamped before exponentiation to keep the transform finite,
    /// matching the guard used during training.
    pub fn inverse_link(self, eta: f64) -> f64 {
        match self {
            ModelType::Linear => eta,
            ModelType::Logistic => {
                let eta = eta.clamp(-700.0, 700.0);
                1.0 / (1.0 + f64::exp(-eta))
            }
            ModelType::Poisson => {
                let eta = eta.clamp(-700.0, 700.0);
                f64::exp(eta)
            }
        }
    }

    /// Per-record negative log-likelihood at linear predictor `eta`
    /// (constant terms in the response dropped).
    pub fn unit_loss(self, response: f64, eta: f64) -> f64 {
        match self {
            ModelType::Linear => {
                let residual = response - eta;
                0.5 * residual * residual
            }
            ModelType::Logistic => {
                // log(1 + e^eta) - y*eta, computed in its stable form.
                let log1p_exp = if eta > 0.0 {
                    eta + (-eta).exp().ln_1p()
                } else {
                    eta.exp().ln_1p()
                };
                log1p_exp - response * eta
            }
            ModelType::Poisson => {
                let eta = eta.clamp(-700.0, 700.0);
                eta.exp() - response * eta
            }
        }
    }

    /// Derivative of [`Self::unit_loss`] with respect to `eta`. For every
    /// canonical link this is `mean - response`.
    pub fn unit_loss_gradient(self, response: f64, eta: f64) -> f64 {
        self.inverse_link(eta) - response
    }
}

/// The trained artifact every coordinate produces: immutable coefficients
/// plus family-specific mean-function behavior.
pub trait GeneralizedLinearModel: Sized + Send + Sync {
    const MODEL_TYPE: ModelType;

    fn from_coefficients(coefficients: Coefficients) -> Self;

    fn coefficients(&self) -> &Coefficients;

    fn model_type(&self) -> ModelType {
        Self::MODEL_TYPE
    }

    /// The linear predictor `dot(coefficients, features)`. Pure, pre-link.
    fn compute_score(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        Ok(features.dot_dense(self.coefficients().as_view())?)
    }

    /// Family-specific mean: inverse link of `compute_score + offset`.
    fn compute_mean(&self, features: &FeatureVector, offset: f64) -> Result<f64, ModelError> {
        let score = self.compute_score(features)?;
        Ok(Self::MODEL_TYPE.inverse_link(score + offset))
    }

    /// The zero-offset special case of [`Self::compute_mean`].
    fn compute_mean_function(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        self.compute_mean(features, 0.0)
    }

    fn compute_mean_function_with_offset(
        &self,
        features: &FeatureVector,
        offset: f64,
    ) -> Result<f64, ModelError> {
        self.compute_mean(features, offset)
    }

    /// Returns a new model of the same family; the receiver is unchanged.
    fn update_coefficients(&self, coefficients: Coefficients) -> Self {
        Self::from_coefficients(coefficients)
    }

    /// Diagnostic gate: fails listing every non-finite coefficient. Invoked
    /// by the caller after a training round, never automatically.
    fn validate_coefficients(&self) -> Result<(), ModelError> {
        Ok(self.coefficients().validate()?)
    }
}

macro_rules! glm_family {
    ($(#[$doc:meta])* $name:ident, $model_type:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            coefficients: Coefficients,
        }

        impl GeneralizedLinearModel for $name {
            const MODEL_TYPE: ModelType = $model_type;

            fn from_coefficients(coefficients: Coefficients) -> Self {
                Self { coefficients }
            }

            fn coefficients(&self) -> &Coefficients {
                &self.coefficients
            }
        }
    };
}

glm_family!(
    /// Gaussian regression with the identity link.
    LinearRegressionModel,
    ModelType::Linear
);
glm_family!(
    /// Logistic regression with the logit link.
    LogisticRegressionModel,
    ModelType::Logistic
);
glm_family!(
    /// Poisson regression with the log link.
    PoissonRegressionModel,
    ModelType::Poisson
);

/// Scores many `(features, offset)` pairs against one model in parallel.
///
/// The immutable model is broadcast to the worker pool once through the
/// `Arc` handle and released when the batch completes; it is never resent
/// per record.
pub fn compute_mean_batch<M: GeneralizedLinearModel>(
    model: Arc<M>,
    batch: &[(FeatureVector, f64)],
) -> Result<Vec<f64>, ModelError> {
    batch
        .par_iter()
        .map(|(features, offset)| model.compute_mean(features, *offset))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn compute_score_is_the_linear_predictor() {
        let model =
            LinearRegressionModel::from_coefficients(Coefficients::new(array![1.0, 2.0, 3.0]));
        let features = FeatureVector::dense(array![0.0, 1.0, 0.0]);
        assert_abs_diff_eq!(model.compute_score(&features).unwrap(), 2.0, epsilon = 1e-12);

        let sparse = FeatureVector::sparse(3, vec![1], vec![1.0]).unwrap();
        assert_abs_diff_eq!(model.compute_score(&sparse).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_lengths_fail_rather_than_truncate() {
        let model =
            LinearRegressionModel::from_coefficients(Coefficients::new(array![1.0, 2.0, 3.0]));
        let short = FeatureVector::dense(array![1.0, 2.0]);
        assert!(model.compute_score(&short).is_err());
    }

    #[test]
    fn logistic_mean_applies_sigmoid_to_score_plus_offset() {
        let model = LogisticRegressionModel::from_coefficients(Coefficients::new(array![1.0]));
        let features = FeatureVector::dense(array![0.0]);
        // score = 0, offset = 0 -> sigmoid(0) = 0.5
        assert_abs_diff_eq!(
            model.compute_mean(&features, 0.0).unwrap(),
            0.5,
            epsilon = 1e-12
        );
        let shifted = model.compute_mean(&features, 2.0).unwrap();
        assert_abs_diff_eq!(shifted, 1.0 / (1.0 + (-2.0f64).exp()), epsilon = 1e-12);
    }

    #[test]
    fn poisson_mean_is_exp_of_predictor() {
        let model = PoissonRegressionModel::from_coefficients(Coefficients::new(array![1.0]));
        let features = FeatureVector::dense(array![2.0]);
        assert_abs_diff_eq!(
            model.compute_mean(&features, 0.5).unwrap(),
            f64::exp(2.5),
            epsilon = 1e-9
        );
    }

    #[test]
    fn mean_function_is_the_zero_offset_case() {
        let features = FeatureVector::dense(array![0.3, -1.2]);
        let coefficients = Coefficients::new(array![0.7, 0.1]);

        let linear = LinearRegressionModel::from_coefficients(coefficients.clone());
        assert_abs_diff_eq!(
            linear.compute_mean_function(&features).unwrap(),
            linear
                .compute_mean_function_with_offset(&features, 0.0)
                .unwrap(),
            epsilon = 1e-12
        );

        let logistic = LogisticRegressionModel::from_coefficients(coefficients.clone());
        assert_abs_diff_eq!(
            logistic.compute_mean_function(&features).unwrap(),
            logistic
                .compute_mean_function_with_offset(&features, 0.0)
                .unwrap(),
            epsilon = 1e-12
        );

        let poisson = PoissonRegressionModel::from_coefficients(coefficients);
        assert_abs_diff_eq!(
            poisson.compute_mean_function(&features).unwrap(),
            poisson
                .compute_mean_function_with_offset(&features, 0.0)
                .unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn update_coefficients_returns_a_new_model() {
        let original =
            LinearRegressionModel::from_coefficients(Coefficients::new(array![1.0, 2.0]));
        let updated = original.update_coefficients(Coefficients::new(array![3.0, 4.0]));
        assert_eq!(original.coefficients().as_view()[0], 1.0);
        assert_eq!(updated.coefficients().as_view()[0], 3.0);
        assert_eq!(updated.model_type(), ModelType::Linear);
    }

    #[test]
    fn validate_coefficients_flags_nan_with_index() {
        let model =
            LinearRegressionModel::from_coefficients(Coefficients::new(array![1.0, f64::NAN]));
        let err = model.validate_coefficients().unwrap_err();
        assert!(err.to_string().contains("[1]"));

        let clean = LinearRegressionModel::from_coefficients(Coefficients::new(array![1.0, 2.0]));
        assert!(clean.validate_coefficients().is_ok());
    }

    #[test]
    fn batch_scoring_matches_single_record_scoring() {
        let model = Arc::new(LogisticRegressionModel::from_coefficients(
            Coefficients::new(array![0.5, -0.5]),
        ));
        let batch: Vec<(FeatureVector, f64)> = vec![
            (FeatureVector::dense(array![1.0, 0.0]), 0.0),
            (FeatureVector::dense(array![0.0, 1.0]), 0.25),
            (FeatureVector::sparse(2, vec![0], vec![2.0]).unwrap(), -1.0),
        ];
        let means = compute_mean_batch(Arc::clone(&model), &batch).unwrap();
        for (mean, (features, offset)) in means.iter().zip(&batch) {
            assert_abs_diff_eq!(
                *mean,
                model.compute_mean(features, *offset).unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn unit_loss_gradient_is_mean_minus_response() {
        for family in [ModelType::Linear, ModelType::Logistic, ModelType::Poisson] {
            let eta = 0.3;
            let response = 1.0;
            assert_abs_diff_eq!(
                family.unit_loss_gradient(response, eta),
                family.inverse_link(eta) - response,
                epsilon = 1e-12
            );
        }
    }
}
