//! # Record Ingestion Module
//!
//! This module is the exclusive entry point for raw tabular data. It converts
//! each row of a Polars `DataFrame` into the canonical per-record unit
//! ([`GameDatum`]) the optimizer operates on, assigning a unique sample id per
//! row from a shared monotonic generator.
//!
//! - Configurable schema: a [`InputColumnNames`] mapping supplies the
//!   effective column name for each logical field, with documented defaults.
//!   The mapping is resolved once into an extraction plan before any row is
//!   touched, so missing-column errors surface up front and per-row work is a
//!   pure function of the row.
//! - Fail-fast validation: reserved column names overlapping the grouping-key
//!   tag set is a configuration error that fails the whole call; an
//!   unresolvable required tag or missing required response fails the call at
//!   the offending row. Nothing is silently skipped or defaulted except the
//!   genuinely optional `offset` and `weight` fields.

use crate::types::{SampleId, SampleIdGenerator};
use crate::vector::FeatureVector;
use ahash::AHashMap;
use ndarray::Array1;
use polars::prelude::*;
use thiserror::Error;

/// Maps the logical ingestion fields to effective physical column names.
///
/// Defaults: `response`, `offset`, `weight`, `uid`, `metadata`. Constructed
/// once, passed by reference, never mutated.
#[derive(Clone, Debug)]
pub struct InputColumnNames {
    pub response: String,
    pub offset: String,
    pub weight: String,
    pub uid: String,
    pub metadata_map: String,
}

impl Default for InputColumnNames {
    fn default() -> Self {
        Self {
            response: "response".to_string(),
            offset: "offset".to_string(),
            weight: "weight".to_string(),
            uid: "uid".to_string(),
            metadata_map: "metadata".to_string(),
        }
    }
}

/// One training/scoring record: response, optional offset and weight, one
/// sparse feature vector per requested shard, and the grouping-key values
/// that route the record to its random-effect sub-problems.
///
/// Created once during ingestion and immutable thereafter; residual-offset
/// refreshes downstream always produce new records, never mutate these.
#[derive(Clone, Debug)]
pub struct GameDatum {
    response: f64,
    offset: Option<f64>,
    weight: Option<f64>,
    feature_shards: AHashMap<String, FeatureVector>,
    id_tags: AHashMap<String, String>,
}

impl GameDatum {
    pub fn new(
        response: f64,
        offset: Option<f64>,
        weight: Option<f64>,
        feature_shards: AHashMap<String, FeatureVector>,
        id_tags: AHashMap<String, String>,
    ) -> Self {
        Self {
            response,
            offset,
            weight,
            feature_shards,
            id_tags,
        }
    }

    /// The label; `NaN` for scoring-only records ingested without a response.
    pub fn response(&self) -> f64 {
        self.response
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// Externally supplied baseline score, 0 when absent.
    pub fn offset_or_default(&self) -> f64 {
        self.offset.unwrap_or(0.0)
    }

    pub fn weight(&self) -> Option<f64> {
        self.weight
    }

    /// Sample weight, 1 when absent.
    pub fn weight_or_default(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }

    pub fn feature_shard(&self, shard_id: &str) -> Option<&FeatureVector> {
        self.feature_shards.get(shard_id)
    }

    pub fn id_tag(&self, tag: &str) -> Option<&str> {
        self.id_tags.get(tag).map(String::as_str)
    }

    pub fn id_tags(&self) -> &AHashMap<String, String> {
        &self.id_tags
    }
}

/// A comprehensive error type for all ingestion failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error(
        "The required column '{0}' was not found in the input frame. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The grouping-key tag '{0}' collides with a reserved column name (response/offset/weight/uid). Rename the tag column or remap the reserved field."
    )]
    ReservedColumnCollision(String),
    #[error(
        "The grouping-key tag '{0}' is resolvable from neither a top-level column nor the metadata map. Every required tag must be present in one of the two."
    )]
    TagUnresolvable(String),
    #[error("Row {row}: no value for required grouping-key tag '{tag}' in either the top-level column or the metadata map.")]
    MissingTagValue { tag: String, row: usize },
    #[error("Row {row}: the required response value is missing or null.")]
    MissingResponse { row: usize },
    #[error("Row {row}: column '{column}' holds a non-numeric value where a number is required.")]
    NonNumericValue { column: String, row: usize },
    #[error("Row {row}: feature shard '{shard}' has no feature vector.")]
    MissingFeatureVector { shard: String, row: usize },
    #[error("Row {row}: feature shard '{shard}' contains null or non-numeric entries.")]
    InvalidFeatureVector { shard: String, row: usize },
}

/// Converts every row of `frame` into a [`GameDatum`] with a freshly
/// assigned unique sample id.
///
/// `shard_ids` names the list-of-float columns to read as per-shard feature
/// vectors; `tag_names` names the required grouping-key tags; when
/// `response_required` is false a missing response column (or value) yields
/// `NaN` instead of an error.
pub fn ingest(
    frame: &DataFrame,
    shard_ids: &[&str],
    tag_names: &[&str],
    response_required: bool,
    columns: &InputColumnNames,
    ids: &SampleIdGenerator,
) -> Result<Vec<(SampleId, GameDatum)>, DataError> {
    let plan = internal::ExtractionPlan::resolve(
        frame,
        shard_ids,
        tag_names,
        response_required,
        columns,
    )?;

    let n_rows = frame.height();
    log::info!(
        "Ingesting {n_rows} rows: {} feature shard(s), {} grouping tag(s), response {}",
        shard_ids.len(),
        tag_names.len(),
        if response_required {
            "required"
        } else {
            "optional"
        }
    );

    let mut datums = Vec::with_capacity(n_rows);
    for row in 0..n_rows {
        let datum = plan.extract_row(row)?;
        datums.push((ids.next_id(), datum));
    }
    Ok(datums)
}

/// Internal module holding the resolved extraction plan and per-row logic.
mod internal {
    use super::*;

    /// One required grouping-key tag with its resolved sources. Resolution
    /// order per row: top-level column first, then the metadata map field.
    struct TagPlan {
        name: String,
        column: Option<Series>,
        metadata_field: Option<Series>,
    }

    /// The fixed, typed extraction plan resolved once per ingestion call and
    /// applied uniformly to every row.
    pub(super) struct ExtractionPlan {
        response: Option<Series>,
        response_required: bool,
        offset: Option<Series>,
        offset_column: String,
        weight: Option<Series>,
        weight_column: String,
        uid: Option<Series>,
        uid_tag: String,
        tags: Vec<TagPlan>,
        shards: Vec<(String, Series)>,
    }

    impl ExtractionPlan {
        pub(super) fn resolve(
            frame: &DataFrame,
            shard_ids: &[&str],
            tag_names: &[&str],
            response_required: bool,
            columns: &InputColumnNames,
        ) -> Result<Self, DataError> {
            // Reserved effective names must be disjoint from the tag set.
            // This is a configuration error, surfaced before any row work.
            let reserved = [
                columns.response.as_str(),
                columns.offset.as_str(),
                columns.weight.as_str(),
                columns.uid.as_str(),
            ];
            for tag in tag_names {
                if reserved.contains(tag) {
                    return Err(DataError::ReservedColumnCollision(tag.to_string()));
                }
            }

            let metadata = lookup(frame, &columns.metadata_map);

            let response = lookup(frame, &columns.response);
            if response_required && response.is_none() {
                return Err(DataError::ColumnNotFound(columns.response.clone()));
            }

            let mut tags = Vec::with_capacity(tag_names.len());
            for &tag in tag_names {
                let column = lookup(frame, tag);
                let metadata_field = metadata
                    .as_ref()
                    .and_then(|meta| meta.struct_().ok())
                    .and_then(|fields| fields.field_by_name(tag).ok());
                if column.is_none() && metadata_field.is_none() {
                    return Err(DataError::TagUnresolvable(tag.to_string()));
                }
                tags.push(TagPlan {
                    name: tag.to_string(),
                    column,
                    metadata_field,
                });
            }

            let mut shards = Vec::with_capacity(shard_ids.len());
            for &shard in shard_ids {
                let series = lookup(frame, shard)
                    .ok_or_else(|| DataError::ColumnNotFound(shard.to_string()))?;
                shards.push((shard.to_string(), series));
            }

            Ok(Self {
                response,
                response_required,
                offset: lookup(frame, &columns.offset),
                offset_column: columns.offset.clone(),
                weight: lookup(frame, &columns.weight),
                weight_column: columns.weight.clone(),
                uid: lookup(frame, &columns.uid),
                uid_tag: columns.uid.clone(),
                tags,
                shards,
            })
        }

        /// Pure per-row conversion against the read-only plan.
        pub(super) fn extract_row(&self, row: usize) -> Result<GameDatum, DataError> {
            let response = match &self.response {
                Some(series) => match numeric_at(series, row) {
                    Some(value) => value,
                    None if self.response_required => {
                        return Err(DataError::MissingResponse { row });
                    }
                    None => f64::NAN,
                },
                None => f64::NAN,
            };
            if self.response_required && response.is_nan() {
                return Err(DataError::MissingResponse { row });
            }

            let offset = self
                .optional_numeric(&self.offset, &self.offset_column, row)?;
            let weight = self
                .optional_numeric(&self.weight, &self.weight_column, row)?;

            let mut id_tags = AHashMap::with_capacity(self.tags.len() + 1);
            for tag in &self.tags {
                let from_column = tag.column.as_ref().and_then(|s| string_at(s, row));
                let value = match from_column {
                    Some(value) => value,
                    None => tag
                        .metadata_field
                        .as_ref()
                        .and_then(|s| string_at(s, row))
                        .ok_or_else(|| DataError::MissingTagValue {
                            tag: tag.name.clone(),
                            row,
                        })?,
                };
                id_tags.insert(tag.name.clone(), value);
            }
            // A present, non-null uid joins the tag map for downstream
            // scoring-result correlation; its absence is never an error.
            if let Some(uid) = &self.uid
                && let Some(value) = string_at(uid, row)
            {
                id_tags.insert(self.uid_tag.clone(), value);
            }

            let mut feature_shards = AHashMap::with_capacity(self.shards.len());
            for (shard, series) in &self.shards {
                let vector = feature_vector_at(series, shard, row)?;
                feature_shards.insert(shard.clone(), vector);
            }

            Ok(GameDatum::new(
                response,
                offset,
                weight,
                feature_shards,
                id_tags,
            ))
        }

        fn optional_numeric(
            &self,
            series: &Option<Series>,
            column: &str,
            row: usize,
        ) -> Result<Option<f64>, DataError> {
            let Some(series) = series else {
                return Ok(None);
            };
            match series.get(row).unwrap_or(AnyValue::Null) {
                AnyValue::Null => Ok(None),
                value => value
                    .extract::<f64>()
                    .map(Some)
                    .ok_or_else(|| DataError::NonNumericValue {
                        column: column.to_string(),
                        row,
                    }),
            }
        }
    }

    fn lookup(frame: &DataFrame, name: &str) -> Option<Series> {
        frame
            .column(name)
            .ok()
            .map(|column| column.as_materialized_series().clone())
    }

    /// Numeric value at `row`, `None` for null entries.
    fn numeric_at(series: &Series, row: usize) -> Option<f64> {
        match series.get(row).unwrap_or(AnyValue::Null) {
            AnyValue::Null => None,
            value => value.extract::<f64>(),
        }
    }

    /// String value at `row`, rendering non-string scalars (e.g. integer
    /// entity ids) through their display form. `None` for null entries.
    fn string_at(series: &Series, row: usize) -> Option<String> {
        match series.get(row).unwrap_or(AnyValue::Null) {
            AnyValue::Null => None,
            AnyValue::String(value) => Some(value.to_string()),
            AnyValue::StringOwned(value) => Some(value.to_string()),
            value => Some(value.to_string()),
        }
    }

    fn feature_vector_at(
        series: &Series,
        shard: &str,
        row: usize,
    ) -> Result<FeatureVector, DataError> {
        let list = series.list().map_err(|_| DataError::InvalidFeatureVector {
            shard: shard.to_string(),
            row,
        })?;
        let element = list
            .get_as_series(row)
            .ok_or_else(|| DataError::MissingFeatureVector {
                shard: shard.to_string(),
                row,
            })?;
        let casted = element
            .cast(&DataType::Float64)
            .map_err(|_| DataError::InvalidFeatureVector {
                shard: shard.to_string(),
                row,
            })?;
        let chunked = casted.f64().map_err(|_| DataError::InvalidFeatureVector {
            shard: shard.to_string(),
            row,
        })?;
        if chunked.null_count() > 0 {
            return Err(DataError::InvalidFeatureVector {
                shard: shard.to_string(),
                row,
            });
        }
        let values: Vec<f64> = chunked.rechunk().into_no_null_iter().collect();
        Ok(FeatureVector::dense(Array1::from_vec(values)))
    }
}
