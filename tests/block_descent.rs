//! End-to-end block coordinate descent over a fixed-effect block and two
//! per-user random-effect blocks, driving the protocol the way an external
//! driver would: score one coordinate, hand the combined residual to the
//! others, retrain, repeat.

use approx::assert_abs_diff_eq;
use gamix::coordinate::{Coordinate, GlmCoordinate, partition_by_tag};
use gamix::data::{InputColumnNames, ingest};
use gamix::model::{GeneralizedLinearModel, LinearRegressionModel, compute_mean_batch};
use gamix::scores::CoordinateDataScores;
use gamix::solver::BfgsSolver;
use gamix::types::SampleIdGenerator;
use gamix::vector::FeatureVector;
use polars::prelude::*;
use std::sync::Arc;

/// y = 2x + bias(user) + 0.5 baseline offset, alice biased +1, bob -1.
fn synthetic_frame() -> DataFrame {
    let n_per_user = 8usize;
    let mut responses = Vec::new();
    let mut offsets = Vec::new();
    let mut users = Vec::new();
    let mut global_rows = Vec::new();
    let mut bias_rows = Vec::new();
    for (user, bias) in [("alice", 1.0), ("bob", -1.0)] {
        for i in 0..n_per_user {
            let x = i as f64 / 2.0;
            responses.push(2.0 * x + bias + 0.5);
            offsets.push(0.5);
            users.push(user);
            global_rows.push(Series::new("".into(), &[x]));
            bias_rows.push(Series::new("".into(), &[1.0]));
        }
    }
    let mut frame = df!(
        "response" => &responses,
        "offset" => &offsets,
        "userId" => &users,
    )
    .unwrap();
    frame
        .with_column(Series::new("global".into(), global_rows))
        .unwrap();
    frame
        .with_column(Series::new("userBias".into(), bias_rows))
        .unwrap();
    frame
}

#[test]
fn descent_recovers_global_slope_and_per_user_biases() {
    let frame = synthetic_frame();
    let ids = SampleIdGenerator::default();
    let data = ingest(
        &frame,
        &["global", "userBias"],
        &["userId"],
        true,
        &InputColumnNames::default(),
        &ids,
    )
    .unwrap();

    let mut fixed: GlmCoordinate<LinearRegressionModel, _> =
        GlmCoordinate::from_data(&data, "global", BfgsSolver::default()).unwrap();
    let mut random = partition_by_tag::<LinearRegressionModel, _>(
        &data,
        "userBias",
        "userId",
        BfgsSolver::default(),
    )
    .unwrap();

    let mut fixed_model = None;
    let mut random_models: Vec<(String, LinearRegressionModel)> = Vec::new();
    let mut random_scores = CoordinateDataScores::default();

    for _round in 0..3 {
        // Fixed effect trains against everything the random effects explain.
        let (model, _) = fixed.train_model_with_residuals(&random_scores).unwrap();
        model.validate_coefficients().unwrap();
        let fixed_scores = fixed.score(&model).unwrap();
        fixed_model = Some(model);

        // Each random effect trains against the fixed-effect residual. The
        // per-entity partitions are disjoint, so the fixed contribution is
        // the whole residual for each of them.
        random_models.clear();
        let mut per_entity = Vec::new();
        for (entity, coordinate) in random.iter_mut() {
            let (model, _) = coordinate
                .train_model_with_residuals(&fixed_scores)
                .unwrap();
            model.validate_coefficients().unwrap();
            per_entity.push(coordinate.score(&model).unwrap());
            random_models.push((entity.clone(), model));
        }
        random_scores = CoordinateDataScores::combine(per_entity.iter());
    }

    let fixed_model = fixed_model.unwrap();
    assert_abs_diff_eq!(
        fixed_model.coefficients().as_view()[0],
        2.0,
        epsilon = 1e-2
    );
    for (entity, model) in &random_models {
        let expected = if entity == "alice" { 1.0 } else { -1.0 };
        assert_abs_diff_eq!(
            model.coefficients().as_view()[0],
            expected,
            epsilon = 1e-2
        );
    }
}

#[test]
fn combined_prediction_is_additive_over_coordinates() {
    let frame = synthetic_frame();
    let ids = SampleIdGenerator::default();
    let data = ingest(
        &frame,
        &["global", "userBias"],
        &["userId"],
        true,
        &InputColumnNames::default(),
        &ids,
    )
    .unwrap();

    let fixed: GlmCoordinate<LinearRegressionModel, _> =
        GlmCoordinate::from_data(&data, "global", BfgsSolver::default()).unwrap();
    let random = partition_by_tag::<LinearRegressionModel, _>(
        &data,
        "userBias",
        "userId",
        BfgsSolver::default(),
    )
    .unwrap();

    // Fixed arbitrary models; additivity must hold for any coefficients.
    let fixed_model = LinearRegressionModel::from_coefficients(
        ndarray::array![1.7].into(),
    );
    let random_model = LinearRegressionModel::from_coefficients(
        ndarray::array![-0.4].into(),
    );

    let fixed_scores = fixed.score(&fixed_model).unwrap();
    let random_scores = CoordinateDataScores::combine(
        random
            .values()
            .map(|coordinate| coordinate.score(&random_model).unwrap())
            .collect::<Vec<_>>()
            .iter(),
    );

    for (id, datum) in &data {
        let eta_total =
            datum.offset_or_default() + fixed_scores.get(*id) + random_scores.get(*id);
        // The same total must fall out of mean-function evaluation when the
        // other coordinates' contributions ride in through the offset.
        let global_features = datum.feature_shard("global").unwrap();
        let mean = fixed_model
            .compute_mean_function_with_offset(
                global_features,
                datum.offset_or_default() + random_scores.get(*id),
            )
            .unwrap();
        // Identity link: the mean is the combined linear predictor.
        assert_abs_diff_eq!(mean, eta_total, epsilon = 1e-12);
    }
}

#[test]
fn warm_start_composition_matches_staged_calls() {
    let frame = synthetic_frame();
    let ids = SampleIdGenerator::default();
    let data = ingest(
        &frame,
        &["global"],
        &["userId"],
        true,
        &InputColumnNames::default(),
        &ids,
    )
    .unwrap();
    let residuals: CoordinateDataScores = data
        .iter()
        .map(|(id, _)| (*id, 0.1 * *id as f64))
        .collect();
    let seed = LinearRegressionModel::from_coefficients(ndarray::array![1.5].into());

    let mut composed: GlmCoordinate<LinearRegressionModel, _> =
        GlmCoordinate::from_data(&data, "global", BfgsSolver::default()).unwrap();
    let (composed_model, _) = composed
        .warm_start_train_with_residuals(&seed, &residuals)
        .unwrap();

    let mut staged: GlmCoordinate<LinearRegressionModel, _> =
        GlmCoordinate::from_data(&data, "global", BfgsSolver::default()).unwrap();
    staged.update_dataset(&residuals);
    let (staged_model, _) = staged.warm_start_train(&seed).unwrap();

    assert_abs_diff_eq!(
        composed_model.coefficients().as_view()[0],
        staged_model.coefficients().as_view()[0],
        epsilon = 1e-9
    );
}

#[test]
fn batch_mean_scoring_agrees_with_record_scoring() {
    let frame = synthetic_frame();
    let ids = SampleIdGenerator::default();
    let data = ingest(
        &frame,
        &["global"],
        &["userId"],
        true,
        &InputColumnNames::default(),
        &ids,
    )
    .unwrap();
    let model = Arc::new(LinearRegressionModel::from_coefficients(
        ndarray::array![2.0].into(),
    ));
    let batch: Vec<(FeatureVector, f64)> = data
        .iter()
        .map(|(_, datum)| {
            (
                datum.feature_shard("global").unwrap().clone(),
                datum.offset_or_default(),
            )
        })
        .collect();
    let means = compute_mean_batch(Arc::clone(&model), &batch).unwrap();
    for (mean, (features, offset)) in means.iter().zip(&batch) {
        assert_abs_diff_eq!(
            *mean,
            model.compute_mean(features, *offset).unwrap(),
            epsilon = 1e-12
        );
    }
}
