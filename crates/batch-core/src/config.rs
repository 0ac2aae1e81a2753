//! batchgrid.toml configuration parser.

use std::path::Path;

use anyhow::ensure;
use serde::{Deserialize, Serialize};

use crate::types::{NodeInfo, StageTable};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub target: TargetConfig,
    pub pool: PoolConfig,
    /// Static node list, used by the simulated node source.
    pub nodes: Vec<NodeInfo>,
    pub planner: PlannerConfig,
    pub scheduler: SchedulerConfig,
    pub prep: PrepConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub id: String,
    pub baseline_level: f64,
    pub baseline_instability: f64,
    /// Starting level for the simulator. Defaults to baseline.
    pub initial_level: Option<f64>,
    /// Starting instability for the simulator. Defaults to baseline.
    pub initial_instability: Option<f64>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            id: "target".to_string(),
            baseline_level: 1_000_000.0,
            baseline_instability: 5.0,
            initial_level: None,
            initial_instability: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Low-priority node, sorted last and carrying `home_reserve`.
    pub home: Option<String>,
    /// Capacity on the home node that is never offered.
    pub home_reserve: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub min_greed: f64,
    pub max_greed: f64,
    pub greed_step: f64,
    /// Upper bound for any single stage's thread count.
    pub max_threads: u32,
    /// Upper bound for concurrent batches in a plan.
    pub max_batches: u32,
    /// Capacity consumed per thread, per stage.
    pub thread_cost: StageTable<f64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            min_greed: 0.01,
            max_greed: 1.0,
            greed_step: 0.01,
            max_threads: 1_000_000,
            max_batches: 512,
            thread_cost: StageTable {
                drain: 1.7,
                stabilize_a: 1.75,
                build: 1.75,
                stabilize_b: 1.75,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minimum gap between consecutive stage completions.
    pub spacer_ms: f64,
    /// Pause after dispatching a wave.
    pub settle_ms: f64,
    /// Number of recent completions checked for canonical order.
    pub desync_window: usize,
    /// How long past its planned end an operation may stay silent before
    /// it is considered lost.
    pub lost_grace_ms: f64,
    /// Stop admitting after this many batches. Unbounded when unset.
    pub max_batches: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            spacer_ms: 20.0,
            settle_ms: 5.0,
            desync_window: 5,
            lost_grace_ms: 5_000.0,
            max_batches: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Absolute tolerance when comparing against baseline.
    pub tolerance: f64,
    pub max_rounds: u32,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_rounds: 100,
        }
    }
}

/// Formula parameters for the simulated target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Fraction of the current level removed per drain thread at baseline instability.
    pub drain_fraction: f64,
    pub drain_instability: f64,
    /// Level added per build thread before compounding.
    pub build_seed: f64,
    /// Compounding growth per build thread at baseline instability.
    pub build_rate: f64,
    pub build_instability: f64,
    /// Instability removed per stabilize thread.
    pub stabilize_power: f64,
    pub drain_ms: f64,
    pub build_ms: f64,
    pub stabilize_ms: f64,
    /// Relative slowdown and weakening per unit of excess instability.
    pub instability_penalty: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            drain_fraction: 0.002,
            drain_instability: 0.002,
            build_seed: 1.0,
            build_rate: 0.0035,
            build_instability: 0.004,
            stabilize_power: 0.05,
            drain_ms: 1_000.0,
            build_ms: 3_200.0,
            stabilize_ms: 4_000.0,
            instability_penalty: 0.02,
        }
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the planner and scheduler cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.planner;
        ensure!(
            p.min_greed > 0.0 && p.min_greed <= p.max_greed && p.max_greed <= 1.0,
            "greed domain must satisfy 0 < min_greed <= max_greed <= 1 (got {}..={})",
            p.min_greed,
            p.max_greed
        );
        ensure!(p.greed_step > 0.0, "greed_step must be positive");
        ensure!(p.max_threads > 0, "max_threads must be positive");
        for (stage, cost) in p.thread_cost.iter() {
            ensure!(*cost > 0.0, "thread cost for {stage} must be positive");
        }

        let s = &self.scheduler;
        ensure!(s.spacer_ms >= 0.0, "spacer_ms must not be negative");
        ensure!(s.desync_window >= 2, "desync_window must be at least 2");
        ensure!(s.lost_grace_ms >= 0.0, "lost_grace_ms must not be negative");

        ensure!(self.prep.tolerance >= 0.0, "prep tolerance must not be negative");
        ensure!(
            self.target.baseline_level > 0.0,
            "target baseline_level must be positive"
        );
        Ok(())
    }

    /// A minimal config with a handful of simulated nodes.
    pub fn scaffold(target_id: &str) -> Self {
        let mut config = GridConfig::default();
        config.target.id = target_id.to_string();
        config.pool.home = Some("home".to_string());
        config.pool.home_reserve = 32.0;
        config.nodes = vec![
            NodeInfo {
                id: "home".to_string(),
                capacity_total: 1024.0,
                capacity_used: 0.0,
            },
            NodeInfo {
                id: "worker-1".to_string(),
                capacity_total: 256.0,
                capacity_used: 0.0,
            },
            NodeInfo {
                id: "worker-2".to_string(),
                capacity_total: 512.0,
                capacity_used: 0.0,
            },
        ];
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scaffold_roundtrips_through_toml() {
        let config = GridConfig::scaffold("alpha");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("alpha"));
        let back: GridConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.nodes.len(), 3);
        assert_eq!(back.pool.home.as_deref(), Some("home"));
    }

    #[test]
    fn test_parse_minimal() {
        let toml_str = r#"
[target]
id = "beta"

[scheduler]
spacer_ms = 40.0
"#;
        let config: GridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.target.id, "beta");
        assert_eq!(config.scheduler.spacer_ms, 40.0);
        assert_eq!(config.scheduler.desync_window, 5);
        assert_eq!(config.planner.thread_cost.drain, 1.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_greed_domain() {
        let mut config = GridConfig::default();
        config.planner.max_greed = 1.5;
        assert!(config.validate().is_err());

        let mut config = GridConfig::default();
        config.planner.min_greed = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_thread_cost() {
        let mut config = GridConfig::default();
        config.planner.thread_cost.build = 0.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("build"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[target]
id = "gamma"
baseline_level = 500.0

[[nodes]]
id = "n1"
capacity_total = 64.0
"#
        )
        .unwrap();

        let config = GridConfig::from_file(file.path()).unwrap();
        assert_eq!(config.target.baseline_level, 500.0);
        assert_eq!(config.nodes[0].capacity_used, 0.0);
    }
}
