//! Simulated target formulas.
//!
//! Drain removes a fraction of the current level per thread, build adds a
//! seed per thread and compounds, and stabilize removes a fixed amount of
//! instability per thread. Excess instability weakens drain and build and
//! slows every stage down.

use batch_core::config::ModelConfig;
use batch_core::{Action, Stage, TargetModel, TargetState};

#[derive(Debug, Clone)]
pub struct SimModel {
    config: ModelConfig,
}

impl SimModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    /// Slowdown and weakening factor from excess instability (>= 1).
    fn penalty(&self, state: &TargetState) -> f64 {
        1.0 + self.config.instability_penalty.max(0.0) * state.instability_excess()
    }
}

impl Default for SimModel {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl TargetModel for SimModel {
    fn level_delta(&self, stage: Stage, threads: u32, state: &TargetState) -> f64 {
        let t = f64::from(threads);
        match stage.action() {
            Action::Drain => {
                let fraction = (self.config.drain_fraction / self.penalty(state) * t).min(1.0);
                -(state.level.max(0.0) * fraction)
            }
            Action::Build => {
                let rate = 1.0 + self.config.build_rate / self.penalty(state);
                let grown = (state.level.max(0.0) + self.config.build_seed * t) * rate.powf(t);
                grown.min(state.baseline_level) - state.level.min(state.baseline_level)
            }
            Action::Stabilize => 0.0,
        }
    }

    fn instability_delta(&self, stage: Stage, threads: u32, _state: &TargetState) -> f64 {
        let t = f64::from(threads);
        match stage.action() {
            Action::Drain => self.config.drain_instability * t,
            Action::Build => self.config.build_instability * t,
            Action::Stabilize => -self.config.stabilize_power * t,
        }
    }

    fn duration(&self, stage: Stage, state: &TargetState) -> f64 {
        let base = match stage.action() {
            Action::Drain => self.config.drain_ms,
            Action::Build => self.config.build_ms,
            Action::Stabilize => self.config.stabilize_ms,
        };
        base * self.penalty(state)
    }
}
