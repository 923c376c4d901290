// Exact rational time for metrical analysis.
//
// Everything downstream (kernels, windows, scores) works in exact
// fractions; floating point would make tie-breaking and cache keys
// unreliable. This crate provides:
// - Offset: a rational position in time, also used for spans and for
//   window-relative sub-offsets
// - Weight: the rational type used for accent weights and scores
// - OffsetCounter: the sparse offset → attack-count mapping that is the
//   fitting engine's primary input, with the raw window-slice operation
//
// Offsets are stored reduced (num-rational normalizes on construction),
// so equality, ordering, and hashing are all structural.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Sub};

use num_rational::Ratio;
use serde::de::Deserializer;
use serde::ser::{Serializer, SerializeSeq};
use serde::{Deserialize, Serialize};

/// Accent weights and fit scores: exact rationals.
pub type Weight = Ratio<i64>;

/// An exact rational position in time, measured from the start of the
/// passage under analysis.
///
/// Doubles as a span (a meter's duration) and as a window-relative
/// sub-offset. Subtraction closes over the type, so negative offsets are
/// representable; consumers that require non-negative positions validate
/// at their own boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(Ratio<i64>);

impl Offset {
    /// Builds `numerator/denominator`, reduced.
    ///
    /// # Panics
    ///
    /// Panics if `denominator` is zero.
    pub fn new(numerator: i64, denominator: i64) -> Offset {
        Offset(Ratio::new(numerator, denominator))
    }

    pub fn from_integer(value: i64) -> Offset {
        Offset(Ratio::from_integer(value))
    }

    pub fn zero() -> Offset {
        Offset(Ratio::from_integer(0))
    }

    pub fn numerator(&self) -> i64 {
        *self.0.numer()
    }

    pub fn denominator(&self) -> i64 {
        *self.0.denom()
    }

    pub fn ratio(&self) -> Ratio<i64> {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Ratio::from_integer(0)
    }

    /// True if `self` is an integer multiple of `unit`.
    ///
    /// # Panics
    ///
    /// Panics if `unit` is zero.
    pub fn is_multiple_of(&self, unit: Offset) -> bool {
        (self.0 / unit.0).is_integer()
    }
}

impl Add for Offset {
    type Output = Offset;

    fn add(self, rhs: Offset) -> Offset {
        Offset(self.0 + rhs.0)
    }
}

impl AddAssign for Offset {
    fn add_assign(&mut self, rhs: Offset) {
        self.0 += rhs.0;
    }
}

impl Sub for Offset {
    type Output = Offset;

    fn sub(self, rhs: Offset) -> Offset {
        Offset(self.0 - rhs.0)
    }
}

impl Div<i64> for Offset {
    type Output = Offset;

    /// # Panics
    ///
    /// Panics if `rhs` is zero.
    fn div(self, rhs: i64) -> Offset {
        Offset(self.0 / rhs)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Ratio prints integers without a denominator ("3", not "3/1").
        write!(f, "{}", self.0)
    }
}

/// Sparse mapping from offset to a non-negative accent weight, typically
/// the number of attacks observed at that instant.
///
/// Keys are kept sorted (B-tree), so iteration order is ascending offset
/// and range queries are binary searches. Counts are unsigned by
/// construction; zero counts are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetCounter {
    counts: BTreeMap<Offset, u32>,
}

impl OffsetCounter {
    pub fn new() -> OffsetCounter {
        OffsetCounter::default()
    }

    /// Counts attack positions: duplicate offsets accumulate.
    pub fn from_attacks(attacks: impl IntoIterator<Item = Offset>) -> OffsetCounter {
        let mut counter = OffsetCounter::new();
        for offset in attacks {
            counter.add(offset, 1);
        }
        counter
    }

    /// Accumulates explicit (offset, count) pairs.
    pub fn from_counts(counts: impl IntoIterator<Item = (Offset, u32)>) -> OffsetCounter {
        let mut counter = OffsetCounter::new();
        for (offset, count) in counts {
            counter.add(offset, count);
        }
        counter
    }

    /// Adds `count` attacks at `offset`. Adding zero is a no-op.
    pub fn add(&mut self, offset: Offset, count: u32) {
        if count == 0 {
            return;
        }
        *self.counts.entry(offset).or_insert(0) += count;
    }

    pub fn count_at(&self, offset: Offset) -> u32 {
        self.counts.get(&offset).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn first_offset(&self) -> Option<Offset> {
        self.counts.keys().next().copied()
    }

    pub fn last_offset(&self) -> Option<Offset> {
        self.counts.keys().next_back().copied()
    }

    /// Iterates (offset, count) in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (Offset, u32)> + '_ {
        self.counts.iter().map(|(&offset, &count)| (offset, count))
    }

    /// The slice of this counter relevant at `start`: every entry with
    /// `start <= offset <= start + length` (inclusive upper boundary),
    /// re-keyed relative to `start`. Empty when `start` lies beyond the
    /// last entry.
    pub fn window(&self, start: Offset, length: Offset) -> OffsetCounter {
        let stop = start + length;
        let counts = self
            .counts
            .range(start..=stop)
            .map(|(&offset, &count)| (offset - start, count))
            .collect();
        OffsetCounter { counts }
    }
}

// JSON maps need string keys, so the counter serializes as a sequence of
// (offset, count) pairs rather than as a map.
impl Serialize for OffsetCounter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.counts.len()))?;
        for (offset, count) in self.iter() {
            seq.serialize_element(&(offset, count))?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for OffsetCounter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs: Vec<(Offset, u32)> = Vec::deserialize(deserializer)?;
        Ok(OffsetCounter::from_counts(pairs))
    }
}
