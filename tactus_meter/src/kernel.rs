// Offset kernel: the resampled accent-weight table derived from a meter.
//
// A kernel maps each grid offset inside one measure to the weight of the
// metrical position it falls on (downbeat highest). Weights are
// normalized to sum to 1, so scores stay comparable between long and
// short kernels. Scoring a window is a sparse inner product over the
// offsets the two sides share.
//
// Kernels are value types: structural equality and hashing over
// (duration, weights) let them serve as table keys, and two meters with
// the same rhythmic structure at a given grid resample to equal kernels.
//
// Produced by meter.rs, consumed by session.rs.

use serde::{Deserialize, Serialize};
use tactus_duration::{Offset, OffsetCounter, Weight};

/// Immutable accent-weight table over one measure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OffsetKernel {
    duration: Offset,
    /// Sorted by offset; every offset is in `[0, duration)`.
    weights: Vec<(Offset, Weight)>,
}

impl OffsetKernel {
    pub(crate) fn from_parts(duration: Offset, weights: Vec<(Offset, Weight)>) -> OffsetKernel {
        debug_assert!(weights.windows(2).all(|pair| pair[0].0 < pair[1].0));
        debug_assert!(weights.iter().all(|&(offset, _)| offset < duration));
        OffsetKernel { duration, weights }
    }

    /// The span this kernel covers: its source meter's duration.
    pub fn duration(&self) -> Offset {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// The accent weight at a relative offset, if the offset is on the
    /// kernel's grid.
    pub fn weight_at(&self, offset: Offset) -> Option<Weight> {
        self.weights
            .binary_search_by(|&(key, _)| key.cmp(&offset))
            .ok()
            .map(|index| self.weights[index].1)
    }

    /// Iterates (offset, weight) in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (Offset, Weight)> + '_ {
        self.weights.iter().copied()
    }

    /// Scores a window against this kernel: the sum of
    /// `weight[offset] * count[offset]` over offsets present on both
    /// sides. Offsets absent from either side contribute zero, so any
    /// window is scoreable; an empty window scores 0.
    pub fn score(&self, window: &OffsetCounter) -> Weight {
        let mut total = Weight::from_integer(0);
        for (offset, count) in window.iter() {
            if let Some(weight) = self.weight_at(offset) {
                total += weight * i64::from(count);
            }
        }
        total
    }
}
