//! Record-indexed score snapshots exchanged between coordinates.

use crate::types::SampleId;
use ahash::AHashMap;
use std::sync::Arc;

/// One coordinate's scalar score contribution per record, keyed by unique
/// sample id.
///
/// Conceptually a sparse map over the full record-id space: records absent
/// from the producing coordinate's partition contribute an implicit 0. Once
/// produced the snapshot is immutable and cheap to share between the driver
/// and the other coordinates (the map is held behind an `Arc`).
#[derive(Clone, Debug, Default)]
pub struct CoordinateDataScores {
    scores: Arc<AHashMap<SampleId, f64>>,
}

impl CoordinateDataScores {
    pub fn new(scores: AHashMap<SampleId, f64>) -> Self {
        Self {
            scores: Arc::new(scores),
        }
    }

    /// The score contribution for `id`, 0 when the id is absent.
    pub fn get(&self, id: SampleId) -> f64 {
        self.scores.get(&id).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SampleId, f64)> + '_ {
        self.scores.iter().map(|(&id, &score)| (id, score))
    }

    /// Pointwise sum of several score snapshots, used by the driver to
    /// combine the residual contributions of all coordinates but one.
    pub fn combine<'a>(parts: impl IntoIterator<Item = &'a CoordinateDataScores>) -> Self {
        let mut combined: AHashMap<SampleId, f64> = AHashMap::new();
        for part in parts {
            for (id, score) in part.iter() {
                *combined.entry(id).or_insert(0.0) += score;
            }
        }
        Self::new(combined)
    }
}

impl FromIterator<(SampleId, f64)> for CoordinateDataScores {
    fn from_iter<I: IntoIterator<Item = (SampleId, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn absent_ids_contribute_zero() {
        let scores: CoordinateDataScores = [(3u64, 1.5)].into_iter().collect();
        assert_abs_diff_eq!(scores.get(3), 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(scores.get(99), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn combine_sums_pointwise() {
        let left: CoordinateDataScores = [(1u64, 1.0), (2, 2.0)].into_iter().collect();
        let right: CoordinateDataScores = [(2u64, 0.5), (4, -1.0)].into_iter().collect();
        let combined = CoordinateDataScores::combine([&left, &right]);
        assert_abs_diff_eq!(combined.get(1), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(combined.get(2), 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(combined.get(4), -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(combined.get(7), 0.0, epsilon = 1e-12);
    }
}
