//! Shared types used across batchgrid crates.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::collab::TargetModel;

/// One of the four stages of a batch, in canonical completion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Removes a fraction of the target's level.
    Drain,
    /// Cancels the instability added by Drain.
    StabilizeA,
    /// Restores the target's level to baseline.
    Build,
    /// Cancels the instability added by Build.
    StabilizeB,
}

impl Stage {
    /// All stages in canonical order.
    pub const ALL: [Stage; 4] = [
        Stage::Drain,
        Stage::StabilizeA,
        Stage::Build,
        Stage::StabilizeB,
    ];

    /// The stage that follows this one in the canonical cycle.
    pub fn next(self) -> Stage {
        match self {
            Stage::Drain => Stage::StabilizeA,
            Stage::StabilizeA => Stage::Build,
            Stage::Build => Stage::StabilizeB,
            Stage::StabilizeB => Stage::Drain,
        }
    }

    /// The last stage of a batch.
    pub fn last() -> Stage {
        Stage::StabilizeB
    }

    /// The action a worker runs for this stage. Both stabilize stages
    /// share one action.
    pub fn action(self) -> Action {
        match self {
            Stage::Drain => Action::Drain,
            Stage::StabilizeA | Stage::StabilizeB => Action::Stabilize,
            Stage::Build => Action::Build,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Drain => "drain",
            Stage::StabilizeA => "stabilize_a",
            Stage::Build => "build",
            Stage::StabilizeB => "stabilize_b",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Worker action behind a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Drain,
    Build,
    Stabilize,
}

/// A value for each stage. Indexable by [`Stage`], so every lookup is total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageTable<T> {
    pub drain: T,
    pub stabilize_a: T,
    pub build: T,
    pub stabilize_b: T,
}

impl<T> StageTable<T> {
    /// Build a table by evaluating `f` once per stage, in canonical order.
    pub fn from_fn(mut f: impl FnMut(Stage) -> T) -> Self {
        Self {
            drain: f(Stage::Drain),
            stabilize_a: f(Stage::StabilizeA),
            build: f(Stage::Build),
            stabilize_b: f(Stage::StabilizeB),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Stage, &T) -> U) -> StageTable<U> {
        StageTable::from_fn(|stage| f(stage, &self[stage]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, &T)> {
        Stage::ALL.into_iter().map(move |stage| (stage, &self[stage]))
    }
}

impl<T> Index<Stage> for StageTable<T> {
    type Output = T;

    fn index(&self, stage: Stage) -> &T {
        match stage {
            Stage::Drain => &self.drain,
            Stage::StabilizeA => &self.stabilize_a,
            Stage::Build => &self.build,
            Stage::StabilizeB => &self.stabilize_b,
        }
    }
}

impl<T> IndexMut<Stage> for StageTable<T> {
    fn index_mut(&mut self, stage: Stage) -> &mut T {
        match stage {
            Stage::Drain => &mut self.drain,
            Stage::StabilizeA => &mut self.stabilize_a,
            Stage::Build => &mut self.build,
            Stage::StabilizeB => &mut self.stabilize_b,
        }
    }
}

/// Observed state of the target resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub level: f64,
    pub baseline_level: f64,
    pub instability: f64,
    pub baseline_instability: f64,
}

impl TargetState {
    /// A target sitting exactly at its baseline.
    pub fn baseline(baseline_level: f64, baseline_instability: f64) -> Self {
        Self {
            level: baseline_level,
            baseline_level,
            instability: baseline_instability,
            baseline_instability,
        }
    }

    /// Copy of this state with level and instability reset to baseline.
    pub fn at_baseline(&self) -> Self {
        Self::baseline(self.baseline_level, self.baseline_instability)
    }

    /// Whether level and instability are both within `tolerance` of baseline.
    pub fn is_at_baseline(&self, tolerance: f64) -> bool {
        self.level_deficit() <= tolerance && self.instability_excess() <= tolerance
    }

    pub fn level_deficit(&self) -> f64 {
        (self.baseline_level - self.level).max(0.0)
    }

    pub fn instability_excess(&self) -> f64 {
        (self.instability - self.baseline_instability).max(0.0)
    }

    /// Replay one stage's effect through `model`, clamped to the state invariants.
    pub fn apply<M: TargetModel + ?Sized>(&self, stage: Stage, threads: u32, model: &M) -> Self {
        let level = self.level + model.level_delta(stage, threads, self);
        let instability = self.instability + model.instability_delta(stage, threads, self);
        Self {
            level: level.clamp(0.0, self.baseline_level),
            instability: instability.max(self.baseline_instability),
            ..*self
        }
    }
}

/// One stage instance, from queueing to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: u64,
    pub stage: Stage,
    pub node_id: String,
    pub threads: u32,
    /// Capacity consumed per thread.
    pub unit_cost: f64,
    /// Planned completion, in clock milliseconds.
    pub planned_end: f64,
    /// Expected run time in milliseconds.
    pub duration: f64,
    pub batch_id: u64,
    pub wants_report: bool,
}

impl Operation {
    /// Capacity reserved for this operation.
    pub fn cost(&self) -> f64 {
        f64::from(self.threads) * self.unit_cost
    }

    /// Planned start, in clock milliseconds.
    pub fn start(&self) -> f64 {
        self.planned_end - self.duration
    }
}

/// Completion message sent by the executor for a reporting operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub stage: Stage,
    pub node_id: String,
    pub cost: f64,
}

/// A worker node as reported by pool discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub capacity_total: f64,
    /// Capacity in use by work outside this scheduler.
    #[serde(default)]
    pub capacity_used: f64,
}
