//! Batch shapes and plans.
//!
//! A [`BatchShape`] is the per-stage thread count for one batch at a given
//! greed. A [`BatchPlan`] adds durations, capacity cost, and how many such
//! batches the pool can run concurrently.

use serde::{Deserialize, Serialize};

use batch_core::{Stage, StageTable, TargetModel, TargetState};

use crate::error::{PlanError, PlanResult};

/// Relative slack when comparing levels against a goal.
const LEVEL_SLACK: f64 = 1e-9;

/// Absolute slack when comparing instability against baseline.
const INSTABILITY_SLACK: f64 = 1e-9;

/// Thread counts for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchShape {
    pub greed: f64,
    pub threads: StageTable<u32>,
    /// Level removed by the drain stage.
    pub drained: f64,
}

impl BatchShape {
    /// Size the four stages of a batch run against `base`, which is
    /// expected to sit at baseline.
    ///
    /// Each stage is sized from the effect of the one before it:
    /// stabilize A cancels drain's instability, build restores the level
    /// drain removed, stabilize B cancels build's instability. Every stage
    /// gets at least one thread.
    pub fn size<M: TargetModel + ?Sized>(
        model: &M,
        base: &TargetState,
        greed: f64,
        max_threads: u32,
    ) -> PlanResult<Self> {
        let goal = greed * base.baseline_level * (1.0 + LEVEL_SLACK);
        let drain = largest_satisfying(max_threads, |t| {
            -model.level_delta(Stage::Drain, t, base) <= goal
        });
        let after_drain = base.apply(Stage::Drain, drain, model);
        let drained = base.level - after_drain.level;
        if drain == 0 || drained <= 0.0 {
            return Err(PlanError::NothingToDrain {
                min_greed: greed,
                max_greed: greed,
            });
        }

        let stabilize_a = stabilize_threads(model, Stage::StabilizeA, &after_drain, max_threads)?;
        let after_a = after_drain.apply(Stage::StabilizeA, stabilize_a, model);

        let target_level = base.baseline_level * (1.0 - LEVEL_SLACK);
        let build = smallest_satisfying(max_threads, |t| {
            after_a.level + model.level_delta(Stage::Build, t, &after_a) >= target_level
        })
        .ok_or(PlanError::Unreachable {
            stage: Stage::Build,
            max_threads,
        })?;
        let after_build = after_a.apply(Stage::Build, build, model);

        let stabilize_b = stabilize_threads(model, Stage::StabilizeB, &after_build, max_threads)?;

        Ok(Self {
            greed,
            threads: StageTable {
                drain,
                stabilize_a,
                build,
                stabilize_b,
            },
            drained,
        })
    }

    /// Apply all four stages to `state` in canonical order.
    pub fn replay<M: TargetModel + ?Sized>(&self, model: &M, state: &TargetState) -> TargetState {
        Stage::ALL
            .into_iter()
            .fold(*state, |s, stage| s.apply(stage, self.threads[stage], model))
    }

    /// Capacity each stage's operation needs.
    pub fn costs(&self, thread_cost: &StageTable<f64>) -> StageTable<f64> {
        self.threads
            .map(|stage, &threads| f64::from(threads) * thread_cost[stage])
    }
}

/// Threads that move `state` back towards baseline in one wave.
///
/// Stabilize A cancels the current excess instability, build restores the
/// level deficit from the stabilized state, and stabilize B cancels what
/// build adds. Drain is always zero. Goals out of reach saturate at
/// `max_threads`; the caller re-observes and tries again.
pub fn correction<M: TargetModel + ?Sized>(
    model: &M,
    state: &TargetState,
    tolerance: f64,
    max_threads: u32,
) -> StageTable<u32> {
    let mut threads = StageTable::default();
    let mut current = *state;

    if current.instability_excess() > tolerance {
        threads.stabilize_a = stabilize_threads(model, Stage::StabilizeA, &current, max_threads)
            .unwrap_or(max_threads);
        current = current.apply(Stage::StabilizeA, threads.stabilize_a, model);
    }

    if current.level_deficit() > tolerance {
        let target_level = current.baseline_level - tolerance / 2.0;
        threads.build = smallest_satisfying(max_threads, |t| {
            current.level + model.level_delta(Stage::Build, t, &current) >= target_level
        })
        .unwrap_or(max_threads);
        current = current.apply(Stage::Build, threads.build, model);
        if current.instability_excess() > 0.0 {
            threads.stabilize_b =
                stabilize_threads(model, Stage::StabilizeB, &current, max_threads)
                    .unwrap_or(max_threads);
        }
    }

    threads
}

/// A sized batch together with its timing and how many fit in the pool.
///
/// Treated as immutable once handed to the scheduler for a dispatch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    pub greed: f64,
    pub threads: StageTable<u32>,
    /// Run time of each stage, in milliseconds.
    pub durations: StageTable<f64>,
    /// Capacity each stage's operation reserves.
    pub costs: StageTable<f64>,
    /// Capacity one batch consumes.
    pub batch_cost: f64,
    /// Capacity all concurrent batches consume together.
    pub pool_cost: f64,
    pub max_concurrent_batches: u32,
    /// Level removed per batch.
    pub drained: f64,
    /// Level removed per millisecond of critical path.
    pub throughput: f64,
}

impl BatchPlan {
    pub fn shape(&self) -> BatchShape {
        BatchShape {
            greed: self.greed,
            threads: self.threads,
            drained: self.drained,
        }
    }

    /// The four stage costs in canonical order.
    pub fn cost_list(&self) -> [f64; 4] {
        Stage::ALL.map(|stage| self.costs[stage])
    }

    pub fn longest_duration(&self) -> f64 {
        self.durations.iter().map(|(_, d)| *d).fold(0.0, f64::max)
    }
}

/// Fewest threads of `stage` that bring `state`'s instability back to baseline.
fn stabilize_threads<M: TargetModel + ?Sized>(
    model: &M,
    stage: Stage,
    state: &TargetState,
    max_threads: u32,
) -> PlanResult<u32> {
    let excess = state.instability_excess();
    smallest_satisfying(max_threads, |t| {
        -model.instability_delta(stage, t, state) + INSTABILITY_SLACK >= excess
    })
    .ok_or(PlanError::Unreachable { stage, max_threads })
}

/// Smallest `t` in `1..=max` for which `pred(t)` holds, assuming `pred` is
/// monotone (false then true).
pub(crate) fn smallest_satisfying(max: u32, pred: impl Fn(u32) -> bool) -> Option<u32> {
    if max == 0 || !pred(max) {
        return None;
    }
    let (mut lo, mut hi) = (1u32, max);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Some(lo)
}

/// Largest `t` in `0..=max` for which `pred(t)` holds, assuming `pred` is
/// monotone (true then false) and holds at zero.
pub(crate) fn largest_satisfying(max: u32, pred: impl Fn(u32) -> bool) -> u32 {
    let (mut lo, mut hi) = (0u32, max);
    while lo < hi {
        let mid = lo + (hi - lo).div_ceil(2);
        if pred(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_satisfying_finds_boundary() {
        assert_eq!(smallest_satisfying(100, |t| t >= 37), Some(37));
        assert_eq!(smallest_satisfying(100, |_| true), Some(1));
        assert_eq!(smallest_satisfying(100, |t| t > 100), None);
        assert_eq!(smallest_satisfying(0, |_| true), None);
    }

    /// Linear effects: one thread moves level or instability by one unit.
    struct UnitModel;

    impl TargetModel for UnitModel {
        fn level_delta(&self, stage: Stage, threads: u32, state: &TargetState) -> f64 {
            match stage {
                Stage::Drain => -f64::from(threads).min(state.level),
                Stage::Build => f64::from(threads).min(state.level_deficit()),
                _ => 0.0,
            }
        }

        fn instability_delta(&self, stage: Stage, threads: u32, _state: &TargetState) -> f64 {
            let t = f64::from(threads);
            match stage {
                Stage::Drain => 0.5 * t,
                Stage::Build => 0.25 * t,
                _ => -t,
            }
        }

        fn duration(&self, _stage: Stage, _state: &TargetState) -> f64 {
            100.0
        }
    }

    #[test]
    fn correction_covers_both_deficits() {
        let mut state = TargetState::baseline(100.0, 1.0);
        state.level = 60.0;
        state.instability = 4.0;

        let threads = correction(&UnitModel, &state, 1e-6, 1000);
        assert_eq!(threads.drain, 0);
        assert_eq!(threads.stabilize_a, 3);
        assert_eq!(threads.build, 40);
        assert_eq!(threads.stabilize_b, 10);

        let end = Stage::ALL
            .into_iter()
            .fold(state, |s, stage| s.apply(stage, threads[stage], &UnitModel));
        assert!(end.is_at_baseline(1e-6));
    }

    #[test]
    fn correction_at_baseline_is_empty() {
        let state = TargetState::baseline(100.0, 1.0);
        assert_eq!(correction(&UnitModel, &state, 1e-6, 1000), StageTable::default());
    }

    #[test]
    fn correction_saturates_out_of_reach_goals() {
        let mut state = TargetState::baseline(100.0, 1.0);
        state.level = 0.0;
        let threads = correction(&UnitModel, &state, 1e-6, 10);
        assert_eq!(threads.build, 10);
        assert_eq!(threads.stabilize_b, 3);
    }

    #[test]
    fn largest_satisfying_finds_boundary() {
        assert_eq!(largest_satisfying(100, |t| t <= 37), 37);
        assert_eq!(largest_satisfying(100, |_| true), 100);
        assert_eq!(largest_satisfying(100, |t| t == 0), 0);
        assert_eq!(largest_satisfying(u32::MAX, |t| t <= 5), 5);
    }
}
