// Meter-fitting session: greedy left-to-right selection with one-step
// lookahead over memoized offset windows.
//
// Construction resamples every candidate meter to a kernel once and
// validates the configuration; fitting then walks the passage from
// offset 0, scoring each candidate kernel against the window of observed
// attacks at the cursor plus the combined response of all kernels one
// candidate-length ahead, and advancing by the winner's duration until
// the observed span is covered.
//
// Windows are cached per start offset: lookahead revisits nearby
// offsets constantly, and the counter never changes mid-session, so the
// cache is never invalidated. The cache is private to the session; run
// concurrent fits over independent passages through fit_passages, which
// builds one session per passage.
//
// Selection rules worth knowing:
// - The lookahead term is a sum over ALL kernels, not a mean, so larger
//   candidate sets weigh lookahead more heavily; lookahead_weight
//   rebalances it.
// - Exact score ties go to the earlier-registered kernel.
// - Distinct meters that resample to equal kernels collapse to one
//   entry; the first registered meter stays the representative.
// - A window with no observed attacks repeats the previous selection
//   (or takes the longest kernel before anything is selected).

use std::rc::Rc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tactus_duration::{Offset, OffsetCounter, Weight};
use tracing::{debug, trace};

use crate::error::FitError;
use crate::kernel::OffsetKernel;
use crate::meter::Meter;

/// Upper bound on the kernel resampling grid. Musical grids top out
/// around 128 (128th notes); this bound leaves headroom while keeping
/// kernel generation from becoming a resource sink.
pub const MAX_KERNEL_DENOMINATOR: u32 = 4096;

/// Tuning parameters for a fitting session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Grid denominator kernels are resampled to (32 = 32nd-note grid).
    pub kernel_denominator: u32,
    /// Cap on immediate repetition of the same kernel; `None` disables
    /// the rule.
    pub maximum_run_length: Option<usize>,
    /// Scale applied to the lookahead sum; 1 preserves the classic
    /// behavior, 0 disables lookahead entirely.
    pub lookahead_weight: Weight,
    /// Hard cap on selection steps; `None` runs unbounded. Useful as a
    /// budget when candidate durations are tiny relative to the span.
    pub step_limit: Option<usize>,
}

impl Default for FitConfig {
    fn default() -> FitConfig {
        FitConfig {
            kernel_denominator: 32,
            maximum_run_length: None,
            lookahead_weight: Weight::from_integer(1),
            step_limit: None,
        }
    }
}

#[derive(Debug)]
struct KernelEntry {
    kernel: OffsetKernel,
    meter: Meter,
}

/// One fitting invocation's state: the kernel table, the observed
/// counter, and the window cache.
///
/// `fit` is re-invocable: each call starts a fresh cursor; only the
/// window cache carries over, and it is pure derived data.
#[derive(Debug)]
pub struct FittingSession {
    /// Registration order; aliased kernels collapsed to their first meter.
    entries: Vec<KernelEntry>,
    /// Index of the longest kernel (first registered among ties).
    longest: usize,
    offset_counter: OffsetCounter,
    window_cache: FxHashMap<Offset, Rc<OffsetCounter>>,
    config: FitConfig,
}

impl FittingSession {
    /// Validates the configuration, resamples each candidate meter to a
    /// kernel, and snapshots the observed counter.
    pub fn new(
        meters: &[Meter],
        offset_counter: OffsetCounter,
        config: FitConfig,
    ) -> Result<FittingSession, FitError> {
        if meters.is_empty() {
            return Err(FitError::NoCandidateMeters);
        }
        if config.kernel_denominator == 0 || config.kernel_denominator > MAX_KERNEL_DENOMINATOR {
            return Err(FitError::InvalidKernelDenominator {
                found: config.kernel_denominator,
            });
        }
        if let Some(run_length) = config.maximum_run_length {
            if run_length == 0 {
                return Err(FitError::InvalidRunLength(run_length));
            }
        }
        if let Some(first) = offset_counter.first_offset() {
            if first.is_negative() {
                return Err(FitError::NegativeOffset(first));
            }
        }

        let mut entries: Vec<KernelEntry> = Vec::with_capacity(meters.len());
        for meter in meters {
            let kernel = meter.kernel(config.kernel_denominator);
            if entries.iter().any(|entry| entry.kernel == kernel) {
                continue;
            }
            entries.push(KernelEntry {
                kernel,
                meter: meter.clone(),
            });
        }
        let mut longest = 0;
        for (index, entry) in entries.iter().enumerate().skip(1) {
            if entry.kernel.duration() > entries[longest].kernel.duration() {
                longest = index;
            }
        }
        debug!(
            candidates = meters.len(),
            kernels = entries.len(),
            longest = %entries[longest].kernel.duration(),
            "fitting session ready"
        );
        Ok(FittingSession {
            entries,
            longest,
            offset_counter,
            window_cache: FxHashMap::default(),
            config,
        })
    }

    /// Fits meters to the observed counter, left to right.
    ///
    /// Returns one meter per selection step, in order; the durations sum
    /// to at least the last observed offset (the final meter may
    /// overshoot; no truncation is performed). An empty counter fits to
    /// an empty sequence.
    pub fn fit(&mut self) -> Result<Vec<Meter>, FitError> {
        let Some(last_offset) = self.offset_counter.last_offset() else {
            return Ok(Vec::new());
        };
        let mut selected: Vec<usize> = Vec::new();
        let mut current = Offset::zero();
        let mut steps = 0usize;
        while current < last_offset {
            if let Some(limit) = self.config.step_limit {
                if steps == limit {
                    return Err(FitError::StepLimitExceeded { limit });
                }
            }
            steps += 1;
            let window = self.window_at(current);
            let winner = if window.is_empty() {
                // No onset evidence at this position: repeat the previous
                // choice, or start with the longest kernel.
                selected.last().copied().unwrap_or(self.longest)
            } else {
                self.best_kernel(current, &window, &selected)
            };
            trace!(offset = %current, meter = %self.entries[winner].meter, "selected");
            selected.push(winner);
            current += self.entries[winner].kernel.duration();
        }
        Ok(selected
            .into_iter()
            .map(|index| self.entries[index].meter.clone())
            .collect())
    }

    /// Scores every candidate (minus the run-length exclusion) at
    /// `current` and returns the index of the strictly best total;
    /// ties go to the earlier-registered kernel.
    fn best_kernel(
        &mut self,
        current: Offset,
        window: &OffsetCounter,
        selected: &[usize],
    ) -> usize {
        let barred = self.barred_kernel(selected);
        let mut winner: Option<(usize, Weight)> = None;
        for index in 0..self.entries.len() {
            if Some(index) == barred {
                continue;
            }
            let immediate = self.entries[index].kernel.score(window);
            let lookahead_window = self.window_at(current + self.entries[index].kernel.duration());
            // The barred kernel still participates here: exclusion only
            // removes it as a candidate, not as future evidence.
            let mut lookahead = Weight::from_integer(0);
            for entry in &self.entries {
                lookahead += entry.kernel.score(&lookahead_window);
            }
            let total = immediate + self.config.lookahead_weight * lookahead;
            let replace = match winner {
                Some((_, best)) => total > best,
                None => true,
            };
            if replace {
                winner = Some((index, total));
            }
        }
        // The exclusion rule never bars the only kernel, so a winner
        // always exists; the fallback is unreachable.
        winner.map_or(self.longest, |(index, _)| index)
    }

    /// The kernel excluded by the run-length rule, if any: the rule
    /// applies only when a cap is configured, at least two distinct
    /// kernels exist, and the last `maximum_run_length` selections were
    /// all the same kernel.
    fn barred_kernel(&self, selected: &[usize]) -> Option<usize> {
        let run_length = self.config.maximum_run_length?;
        if self.entries.len() < 2 || selected.len() < run_length {
            return None;
        }
        let tail = &selected[selected.len() - run_length..];
        let candidate = tail[0];
        tail.iter()
            .all(|&index| index == candidate)
            .then_some(candidate)
    }

    /// The window of the observed counter relevant at `start`: every
    /// entry in `start..=start + longest_kernel.duration` re-keyed
    /// relative to `start`. Memoized per start offset; never
    /// invalidated, since the counter is immutable for the session.
    fn window_at(&mut self, start: Offset) -> Rc<OffsetCounter> {
        if let Some(window) = self.window_cache.get(&start) {
            return Rc::clone(window);
        }
        let length = self.entries[self.longest].kernel.duration();
        let window = Rc::new(self.offset_counter.window(start, length));
        self.window_cache.insert(start, Rc::clone(&window));
        window
    }
}

/// Fits `meters` to `offset_counter` in one pass: the single-call
/// surface over [`FittingSession`].
pub fn fit_meters(
    meters: &[Meter],
    offset_counter: &OffsetCounter,
    config: &FitConfig,
) -> Result<Vec<Meter>, FitError> {
    FittingSession::new(meters, offset_counter.clone(), config.clone())?.fit()
}

/// Fits several independent passages in parallel, one private session
/// per passage. Sessions share nothing mutable, so results are identical
/// to fitting each passage serially.
pub fn fit_passages(
    meters: &[Meter],
    passages: &[OffsetCounter],
    config: &FitConfig,
) -> Result<Vec<Vec<Meter>>, FitError> {
    passages
        .par_iter()
        .map(|passage| fit_meters(meters, passage, config))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(entries: &[((i64, i64), u32)]) -> OffsetCounter {
        OffsetCounter::from_counts(
            entries
                .iter()
                .map(|&((numerator, denominator), count)| {
                    (Offset::new(numerator, denominator), count)
                }),
        )
    }

    fn meters(specs: &[&str]) -> Vec<Meter> {
        specs.iter().map(|spec| spec.parse().unwrap()).collect()
    }

    fn durations_total(fitted: &[Meter]) -> Offset {
        fitted
            .iter()
            .fold(Offset::zero(), |total, meter| total + meter.duration())
    }

    // The strong-weak-strong-weak passage: a strong onset at 0, weak at
    // 1/4, strong at 3/8, weak at 5/8.
    fn spec_passage() -> OffsetCounter {
        counter(&[((0, 1), 4), ((1, 4), 1), ((3, 8), 3), ((5, 8), 1)])
    }

    #[test]
    fn test_empty_counter_fits_empty() {
        let mut session = FittingSession::new(
            &meters(&["4/4"]),
            OffsetCounter::new(),
            FitConfig::default(),
        )
        .unwrap();
        assert_eq!(session.fit().unwrap(), Vec::<Meter>::new());
    }

    #[test]
    fn test_empty_candidates_rejected() {
        let result = FittingSession::new(&[], spec_passage(), FitConfig::default());
        assert_eq!(result.unwrap_err(), FitError::NoCandidateMeters);
    }

    #[test]
    fn test_zero_run_length_rejected() {
        let config = FitConfig {
            maximum_run_length: Some(0),
            ..FitConfig::default()
        };
        let result = FittingSession::new(&meters(&["4/4"]), spec_passage(), config);
        assert_eq!(result.unwrap_err(), FitError::InvalidRunLength(0));
    }

    #[test]
    fn test_kernel_denominator_bounds() {
        for bad in [0, MAX_KERNEL_DENOMINATOR + 1] {
            let config = FitConfig {
                kernel_denominator: bad,
                ..FitConfig::default()
            };
            let result = FittingSession::new(&meters(&["4/4"]), spec_passage(), config);
            assert_eq!(
                result.unwrap_err(),
                FitError::InvalidKernelDenominator { found: bad }
            );
        }
    }

    #[test]
    fn test_negative_offset_rejected() {
        let passage = counter(&[((-1, 4), 1), ((0, 1), 2)]);
        let result = FittingSession::new(&meters(&["4/4"]), passage, FitConfig::default());
        assert_eq!(
            result.unwrap_err(),
            FitError::NegativeOffset(Offset::new(-1, 4))
        );
    }

    #[test]
    fn test_end_to_end_quarter_then_three_eight() {
        // 1/4 wins the opening strong-weak cell, 3/8 the rest; together
        // they partition the observed span exactly.
        let candidates = meters(&["1/4", "3/8"]);
        let fitted = fit_meters(&candidates, &spec_passage(), &FitConfig::default()).unwrap();
        assert_eq!(fitted, meters(&["1/4", "3/8"]));
        assert_eq!(durations_total(&fitted), Offset::new(5, 8));
    }

    #[test]
    fn test_fit_covers_span() {
        let candidates = meters(&["1/4"]);
        let passage = counter(&[((0, 1), 1), ((1, 3), 1)]);
        let fitted = fit_meters(&candidates, &passage, &FitConfig::default()).unwrap();
        assert_eq!(fitted.len(), 2);
        let total = durations_total(&fitted);
        assert!(total >= Offset::new(1, 3));
        // Strictly short of the span without the final meter.
        let without_last = durations_total(&fitted[..fitted.len() - 1]);
        assert!(without_last < Offset::new(1, 3));
    }

    #[test]
    fn test_lookahead_weight_isolates_lookahead() {
        // With lookahead disabled the greedy choice repeats 1/4 to the
        // end instead of switching to 3/8.
        let candidates = meters(&["1/4", "3/8"]);
        let config = FitConfig {
            lookahead_weight: Weight::from_integer(0),
            ..FitConfig::default()
        };
        let fitted = fit_meters(&candidates, &spec_passage(), &config).unwrap();
        assert_eq!(fitted, meters(&["1/4", "1/4", "1/4"]));
    }

    #[test]
    fn test_waltz_prefers_three_four() {
        let passage = counter(&[
            ((0, 1), 4),
            ((1, 4), 1),
            ((1, 2), 1),
            ((3, 4), 4),
            ((1, 1), 1),
            ((5, 4), 1),
            ((3, 2), 4),
            ((7, 4), 1),
            ((2, 1), 1),
        ]);
        let fitted = fit_meters(&meters(&["4/4", "3/4"]), &passage, &FitConfig::default()).unwrap();
        assert_eq!(fitted, meters(&["3/4", "3/4", "3/4"]));
    }

    #[test]
    fn test_duple_prefers_four_four() {
        let passage = counter(&[
            ((0, 1), 4),
            ((1, 2), 2),
            ((1, 1), 4),
            ((3, 2), 2),
            ((2, 1), 4),
            ((5, 2), 2),
            ((3, 1), 4),
        ]);
        let fitted = fit_meters(&meters(&["4/4", "3/4"]), &passage, &FitConfig::default()).unwrap();
        assert_eq!(fitted, meters(&["4/4", "4/4", "4/4"]));
    }

    #[test]
    fn test_run_length_constraint() {
        // A heavy downbeat on every quarter makes 1/4 the naive choice
        // at every step.
        let mut passage = OffsetCounter::new();
        for quarters in 0..8 {
            passage.add(Offset::new(quarters, 4), 4);
        }
        let candidates = meters(&["1/4", "2/4"]);

        let unconstrained = fit_meters(&candidates, &passage, &FitConfig::default()).unwrap();
        assert_eq!(unconstrained, meters(&["1/4"; 7]));

        let config = FitConfig {
            maximum_run_length: Some(2),
            ..FitConfig::default()
        };
        let fitted = fit_meters(&candidates, &passage, &config).unwrap();
        assert_eq!(fitted, meters(&["1/4", "1/4", "2/4", "1/4", "1/4", "2/4"]));
        // Never more than two consecutive equal meters.
        for run in fitted.windows(3) {
            assert!(!(run[0] == run[1] && run[1] == run[2]));
        }
    }

    #[test]
    fn test_empty_window_repeats_previous() {
        // Nothing is observed between the opening attack and 7/8, so the
        // step at 1/4 sees an empty window and repeats the 1/4 choice.
        let passage = counter(&[((0, 1), 1), ((7, 8), 2)]);
        let fitted =
            fit_meters(&meters(&["1/4", "3/8"]), &passage, &FitConfig::default()).unwrap();
        assert_eq!(fitted, meters(&["1/4", "1/4", "3/8"]));
    }

    #[test]
    fn test_empty_window_starts_with_longest() {
        // The first observed attack lies beyond every kernel, so the
        // opening window is empty and the longest kernel leads; with the
        // 6/8-first registration order, 6/8 is the longest-duration tie
        // winner.
        let passage = counter(&[((1, 1), 1)]);
        let fitted =
            fit_meters(&meters(&["6/8", "3/4"]), &passage, &FitConfig::default()).unwrap();
        assert_eq!(fitted[0], Meter::new(6, 8));
        let swapped =
            fit_meters(&meters(&["3/4", "6/8"]), &passage, &FitConfig::default()).unwrap();
        assert_eq!(swapped[0], Meter::new(3, 4));
    }

    #[test]
    fn test_determinism_across_fits() {
        let mut session = FittingSession::new(
            &meters(&["1/4", "3/8"]),
            spec_passage(),
            FitConfig::default(),
        )
        .unwrap();
        let first = session.fit().unwrap();
        let second = session.fit().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_window_cache_contents_and_reuse() {
        let passage = counter(&[((0, 1), 1), ((1, 4), 2), ((3, 8), 3), ((1, 2), 4)]);
        let mut session =
            FittingSession::new(&meters(&["3/8"]), passage, FitConfig::default()).unwrap();
        let window = session.window_at(Offset::new(1, 8));
        // Exactly the observed offsets in [1/8, 1/8 + 3/8], re-keyed;
        // the entry at 1/2 sits on the inclusive boundary.
        assert_eq!(window.len(), 3);
        assert_eq!(window.count_at(Offset::new(1, 8)), 2);
        assert_eq!(window.count_at(Offset::new(1, 4)), 3);
        assert_eq!(window.count_at(Offset::new(3, 8)), 4);
        // The second fetch is the memoized allocation, not a recompute.
        let again = session.window_at(Offset::new(1, 8));
        assert!(Rc::ptr_eq(&window, &again));
    }

    #[test]
    fn test_aliased_meters_recover_first_registered() {
        // On a whole-note grid both groupings of 2/4 resample to the bare
        // downbeat kernel, so they collapse to one entry.
        let flat = Meter::new(2, 4);
        let halved = Meter::with_groups(2, 4, &[2]);
        assert_eq!(flat.kernel(1), halved.kernel(1));
        assert_ne!(flat, halved);

        let passage = counter(&[((0, 1), 1), ((1, 4), 1)]);
        let config = FitConfig {
            kernel_denominator: 1,
            ..FitConfig::default()
        };
        let fitted = fit_meters(&[flat.clone(), halved.clone()], &passage, &config).unwrap();
        assert_eq!(fitted, vec![flat.clone()]);
        let swapped = fit_meters(&[halved.clone(), flat], &passage, &config).unwrap();
        assert_eq!(swapped, vec![halved]);
    }

    #[test]
    fn test_step_limit_guards_runaway_loops() {
        let config = FitConfig {
            step_limit: Some(1),
            ..FitConfig::default()
        };
        let result = fit_meters(&meters(&["1/4", "3/8"]), &spec_passage(), &config);
        assert_eq!(result.unwrap_err(), FitError::StepLimitExceeded { limit: 1 });
    }

    #[test]
    fn test_fit_passages_matches_serial() {
        let candidates = meters(&["1/4", "3/8"]);
        let passages = vec![
            spec_passage(),
            counter(&[((0, 1), 1), ((7, 8), 2)]),
            OffsetCounter::new(),
        ];
        let config = FitConfig::default();
        let parallel = fit_passages(&candidates, &passages, &config).unwrap();
        let serial: Vec<_> = passages
            .iter()
            .map(|passage| fit_meters(&candidates, passage, &config).unwrap())
            .collect();
        assert_eq!(parallel, serial);
    }
}
