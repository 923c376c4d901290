// Meter: a candidate metrical unit, a time signature plus an explicit
// beat grouping.
//
// The grouping determines the accent hierarchy: 6/8 groups its six
// eighths as 3+3 (compound), so the fourth eighth carries more weight
// than its neighbors, while 6/8 grouped 2+2+2 accents differently.
// Kernel generation resamples that hierarchy onto a fixed grid:
//
//   level 0  the measure start (downbeat)
//   level 1  each beat-group start
//   level 2+ every multiple of 1/denominator, then of 1/(2*denominator),
//            and so on down to the grid step
//
// The raw weight of a grid offset is the number of levels it appears in;
// weights are then normalized to sum to 1. Offsets that miss the grid
// are dropped. Identical structures therefore resample to identical
// kernels regardless of how the Meter value was built.
//
// Consumed by session.rs, which turns candidate meters into kernels once
// per session.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use tactus_duration::{Offset, Weight};
use thiserror::Error;

use crate::kernel::OffsetKernel;

/// A time signature with an explicit beat grouping.
///
/// Immutable value type; equality and hashing are structural, so two
/// meters differ when their groupings differ even at the same
/// numerator/denominator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meter {
    numerator: u8,
    denominator: u8,
    /// Beat groups in denominator units; sums to `numerator`.
    groups: SmallVec<[u8; 4]>,
}

impl Meter {
    /// Builds a meter with its conventional grouping: numerators
    /// divisible by 3 (above 3) group in threes (6/8 = 3+3), even
    /// numerators from 4 up split at the half measure (4/4 = 2+2), and
    /// anything else gets one group per denominator unit (3/4 = 1+1+1).
    ///
    /// # Panics
    ///
    /// Panics if `numerator` or `denominator` is zero.
    pub fn new(numerator: u8, denominator: u8) -> Meter {
        assert!(numerator > 0, "meter numerator must be positive");
        assert!(denominator > 0, "meter denominator must be positive");
        Meter {
            numerator,
            denominator,
            groups: default_groups(numerator),
        }
    }

    /// Builds a meter with a custom beat grouping, e.g. 7/8 as 3+2+2.
    ///
    /// # Panics
    ///
    /// Panics if `numerator` or `denominator` is zero, if `groups` is
    /// empty or contains a zero, or if the groups do not sum to the
    /// numerator.
    pub fn with_groups(numerator: u8, denominator: u8, groups: &[u8]) -> Meter {
        assert!(numerator > 0, "meter numerator must be positive");
        assert!(denominator > 0, "meter denominator must be positive");
        assert!(!groups.is_empty(), "beat grouping must not be empty");
        assert!(
            groups.iter().all(|&group| group > 0),
            "beat groups must be positive"
        );
        let total: u32 = groups.iter().map(|&group| u32::from(group)).sum();
        assert_eq!(
            total,
            u32::from(numerator),
            "beat groups must sum to the numerator"
        );
        Meter {
            numerator,
            denominator,
            groups: SmallVec::from_slice(groups),
        }
    }

    pub fn numerator(&self) -> u8 {
        self.numerator
    }

    pub fn denominator(&self) -> u8 {
        self.denominator
    }

    pub fn groups(&self) -> &[u8] {
        &self.groups
    }

    /// The measure's span: numerator/denominator as an exact rational.
    pub fn duration(&self) -> Offset {
        Offset::new(i64::from(self.numerator), i64::from(self.denominator))
    }

    /// Resamples this meter's accent hierarchy onto multiples of
    /// `1/kernel_denominator`. Deterministic: equal structures give
    /// bit-for-bit equal kernels.
    pub fn kernel(&self, kernel_denominator: u32) -> OffsetKernel {
        let duration = self.duration();
        let step = Offset::new(1, i64::from(kernel_denominator));
        let mut counts: BTreeMap<Offset, u32> = BTreeMap::new();

        // Measure level: the downbeat. Offset 0 is on every grid.
        *counts.entry(Offset::zero()).or_insert(0) += 1;

        // Beat-group level.
        let mut unit = 0i64;
        for &group in &self.groups {
            let start = Offset::new(unit, i64::from(self.denominator));
            if start.is_multiple_of(step) {
                *counts.entry(start).or_insert(0) += 1;
            }
            unit += i64::from(group);
        }

        // Pulse level, then binary subdivisions down to the grid step.
        let mut span = Offset::new(1, i64::from(self.denominator));
        while span >= step {
            let mut offset = Offset::zero();
            while offset < duration {
                if offset.is_multiple_of(step) {
                    *counts.entry(offset).or_insert(0) += 1;
                }
                offset += span;
            }
            span = span / 2;
        }

        let total: u32 = counts.values().sum();
        let weights = counts
            .into_iter()
            .map(|(offset, count)| {
                (offset, Weight::new(i64::from(count), i64::from(total)))
            })
            .collect();
        OffsetKernel::from_parts(duration, weights)
    }
}

fn default_groups(numerator: u8) -> SmallVec<[u8; 4]> {
    if numerator > 3 && numerator % 3 == 0 {
        smallvec![3u8; usize::from(numerator / 3)]
    } else if numerator >= 4 && numerator % 2 == 0 {
        smallvec![numerator / 2; 2]
    } else {
        smallvec![1u8; usize::from(numerator)]
    }
}

impl fmt::Display for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Failure to parse a `"numerator/denominator"` meter string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid meter {0:?}: expected \"numerator/denominator\" with nonzero parts")]
pub struct ParseMeterError(pub String);

impl FromStr for Meter {
    type Err = ParseMeterError;

    fn from_str(s: &str) -> Result<Meter, ParseMeterError> {
        let err = || ParseMeterError(s.to_string());
        let (numerator, denominator) = s.split_once('/').ok_or_else(err)?;
        let numerator: u8 = numerator.trim().parse().map_err(|_| err())?;
        let denominator: u8 = denominator.trim().parse().map_err(|_| err())?;
        if numerator == 0 || denominator == 0 {
            return Err(err());
        }
        Ok(Meter::new(numerator, denominator))
    }
}
