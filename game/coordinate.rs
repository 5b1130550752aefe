//! # Coordinate — block coordinate descent participant
//!
//! A [`Coordinate`] owns one block of the overall GAME model: its own record
//! partition (with current residual offsets baked in) and a solver. The
//! external driver repeatedly asks one coordinate to `score` with its current
//! model, combines that contribution with the running total, and asks every
//! *other* coordinate to refresh its dataset with the combined residual
//! before its next training call.
//!
//! The invariant this contract supports: at any point the true combined
//! prediction for a record is the sum of `score(model_i)` over all
//! coordinates plus the record's original offset. `update_dataset` replaces
//! each record's effective offset with `original_offset + residual`, so a
//! coordinate only ever optimizes a two-term objective. A coordinate has no
//! concept of convergence; terminal states belong to the driver.

use crate::data::GameDatum;
use crate::model::{GeneralizedLinearModel, ModelError};
use crate::scores::CoordinateDataScores;
use crate::solver::{CoordinateSolver, OptimizationTracker, SolverError};
use crate::types::SampleId;
use crate::vector::FeatureVector;
use ahash::AHashMap;
use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinateError {
    /// Solver failures forward unchanged; retry or fallback is driver policy.
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("record {id} carries no feature vector for shard '{shard}'")]
    MissingFeatureShard { shard: String, id: SampleId },
    #[error("record {id} carries no value for grouping tag '{tag}'")]
    MissingPartitionTag { tag: String, id: SampleId },
}

/// A coordinate's internal per-record view: the shard-specific features plus
/// the offsets the residual-update protocol maintains.
#[derive(Clone, Debug)]
pub struct CoordinateRecord {
    pub id: SampleId,
    pub response: f64,
    /// The externally supplied baseline from ingestion; never changes.
    pub original_offset: f64,
    /// `original_offset` plus the latest residual contribution of all other
    /// coordinates. This is what the solver sees.
    pub effective_offset: f64,
    pub weight: f64,
    pub features: FeatureVector,
}

/// The block-coordinate-descent participant contract.
///
/// The composed `*_with_residuals` variants are exactly `update_dataset`
/// followed by the plain variant; they are the steady-state calls of the
/// iterative descent loop.
pub trait Coordinate {
    type Model: GeneralizedLinearModel;

    /// Cold-start training against the current dataset state.
    fn train_model(
        &self,
    ) -> Result<(Self::Model, OptimizationTracker), CoordinateError>;

    /// Warm-start training seeded from `existing` instead of a cold start.
    fn warm_start_train(
        &self,
        existing: &Self::Model,
    ) -> Result<(Self::Model, OptimizationTracker), CoordinateError>;

    /// Replaces each record's effective offset with `original_offset +
    /// residuals(id)`; ids absent from `residuals` contribute 0. Produces a
    /// new internal snapshot; shared inputs are never mutated.
    fn update_dataset(&mut self, residuals: &CoordinateDataScores);

    /// This model's raw (pre-link) contribution per record, keyed by unique
    /// sample id.
    fn score(&self, model: &Self::Model) -> Result<CoordinateDataScores, CoordinateError>;

    fn train_model_with_residuals(
        &mut self,
        residuals: &CoordinateDataScores,
    ) -> Result<(Self::Model, OptimizationTracker), CoordinateError> {
        self.update_dataset(residuals);
        self.train_model()
    }

    fn warm_start_train_with_residuals(
        &mut self,
        existing: &Self::Model,
        residuals: &CoordinateDataScores,
    ) -> Result<(Self::Model, OptimizationTracker), CoordinateError> {
        self.update_dataset(residuals);
        self.warm_start_train(existing)
    }
}

/// A GLM coordinate over one feature shard, generic over model family and
/// solver. Covers both the fixed-effect block (built over the whole record
/// set) and each random-effect block (built from one entity's partition via
/// [`partition_by_tag`]).
#[derive(Debug)]
pub struct GlmCoordinate<M, S> {
    records: Arc<[CoordinateRecord]>,
    solver: S,
    _model: PhantomData<M>,
}

impl<M, S> GlmCoordinate<M, S>
where
    M: GeneralizedLinearModel,
    S: CoordinateSolver,
{
    pub fn new(records: Vec<CoordinateRecord>, solver: S) -> Self {
        Self {
            records: records.into(),
            solver,
            _model: PhantomData,
        }
    }

    /// Builds a coordinate over every ingested record, reading the feature
    /// vector of `shard_id`. A record without that shard is an error, not a
    /// silent skip.
    pub fn from_data(
        data: &[(SampleId, GameDatum)],
        shard_id: &str,
        solver: S,
    ) -> Result<Self, CoordinateError> {
        let mut records = Vec::with_capacity(data.len());
        for (id, datum) in data {
            records.push(coordinate_record(*id, datum, shard_id)?);
        }
        Ok(Self::new(records, solver))
    }

    /// Read access to the current snapshot, for driver-side diagnostics.
    pub fn records(&self) -> &[CoordinateRecord] {
        &self.records
    }
}

impl<M, S> Coordinate for GlmCoordinate<M, S>
where
    M: GeneralizedLinearModel,
    S: CoordinateSolver,
{
    type Model = M;

    fn train_model(&self) -> Result<(M, OptimizationTracker), CoordinateError> {
        let (coefficients, tracker) = self
            .solver
            .solve(&self.records, M::MODEL_TYPE, None)?;
        Ok((M::from_coefficients(coefficients), tracker))
    }

    fn warm_start_train(
        &self,
        existing: &M,
    ) -> Result<(M, OptimizationTracker), CoordinateError> {
        let (coefficients, tracker) =
            self.solver
                .solve(&self.records, M::MODEL_TYPE, Some(existing.coefficients()))?;
        Ok((M::from_coefficients(coefficients), tracker))
    }

    fn update_dataset(&mut self, residuals: &CoordinateDataScores) {
        let updated: Vec<CoordinateRecord> = self
            .records
            .iter()
            .map(|record| {
                let mut record = record.clone();
                record.effective_offset = record.original_offset + residuals.get(record.id);
                record
            })
            .collect();
        log::debug!(
            "Refreshed residual offsets for {} records ({} residual entries)",
            updated.len(),
            residuals.len()
        );
        self.records = updated.into();
    }

    fn score(&self, model: &M) -> Result<CoordinateDataScores, CoordinateError> {
        let scored: Result<Vec<(SampleId, f64)>, ModelError> = self
            .records
            .par_iter()
            .map(|record| {
                model
                    .compute_score(&record.features)
                    .map(|score| (record.id, score))
            })
            .collect();
        Ok(scored?.into_iter().collect())
    }
}

/// Splits the record set into one coordinate per distinct value of `tag`,
/// each reading the feature vectors of `shard_id`. Every record must carry
/// the tag; partitioning fails otherwise.
pub fn partition_by_tag<M, S>(
    data: &[(SampleId, GameDatum)],
    shard_id: &str,
    tag: &str,
    solver: S,
) -> Result<AHashMap<String, GlmCoordinate<M, S>>, CoordinateError>
where
    M: GeneralizedLinearModel,
    S: CoordinateSolver + Clone,
{
    let mut partitions: AHashMap<String, Vec<CoordinateRecord>> = AHashMap::new();
    for (id, datum) in data {
        let entity = datum
            .id_tag(tag)
            .ok_or_else(|| CoordinateError::MissingPartitionTag {
                tag: tag.to_string(),
                id: *id,
            })?;
        partitions
            .entry(entity.to_string())
            .or_default()
            .push(coordinate_record(*id, datum, shard_id)?);
    }
    log::info!(
        "Partitioned {} records into {} random-effect blocks by tag '{tag}'",
        data.len(),
        partitions.len()
    );
    Ok(partitions
        .into_iter()
        .map(|(entity, records)| (entity, GlmCoordinate::new(records, solver.clone())))
        .collect())
}

fn coordinate_record(
    id: SampleId,
    datum: &GameDatum,
    shard_id: &str,
) -> Result<CoordinateRecord, CoordinateError> {
    let features = datum
        .feature_shard(shard_id)
        .ok_or_else(|| CoordinateError::MissingFeatureShard {
            shard: shard_id.to_string(),
            id,
        })?
        .clone();
    let original_offset = datum.offset_or_default();
    Ok(CoordinateRecord {
        id,
        response: datum.response(),
        original_offset,
        effective_offset: original_offset,
        weight: datum.weight_or_default(),
        features,
    })
}
