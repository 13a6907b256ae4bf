//! Simulator configuration.
//!
//! Parses `agvsim.toml` (or an explicit override path). Every knob has a
//! default matching the production parameter set, so an absent or partial
//! file is fine; unknown fields are ignored so the format can grow without
//! breaking older files. A malformed file falls back to defaults with a
//! warning — configuration is tuning, not input, and must never be the
//! reason a replay refuses to run.

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "agvsim.toml";

/// Handling and processing durations, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Shelf load/unload handling time.
    pub shelf_handling_secs: i64,
    /// Per-step handling time during a shuffle eviction/restore.
    pub shuffle_step_secs: i64,
    /// One queue-slot advance.
    pub queue_move_secs: i64,
    /// Idle-AGV parking wait when no task qualifies.
    pub park_wait_secs: i64,
    /// Wave deadline offset from the run epoch.
    pub deadline_hours: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            shelf_handling_secs: 5,
            shuffle_step_secs: 10,
            queue_move_secs: 5,
            park_wait_secs: 5,
            deadline_hours: 4,
        }
    }
}

/// Pathfinder cost model and budgets. `dynamic_horizon_secs` bounds how far
/// into the future reservations are honored; the right value is
/// workload-dependent, hence a knob rather than a constant.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub dynamic_horizon_secs: i64,
    pub heuristic_weight: u32,
    pub turn_cost: u32,
    pub u_turn_cost: u32,
    pub wait_cost: u32,
    pub tunnel_cost: u32,
    pub shelf_pass_cost: u32,
    pub expansion_floor: u32,
    pub expansion_per_cell: u32,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            dynamic_horizon_secs: 60,
            heuristic_weight: 2,
            turn_cost: 2,
            u_turn_cost: 4,
            wait_cost: 1,
            tunnel_cost: 50,
            shelf_pass_cost: 3,
            expansion_floor: 500,
            expansion_per_cell: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Soft admission ceiling per station (queue slots + processing cell).
    pub zone_capacity: usize,
    /// Seconds added to a task's score per failed attempt.
    pub retry_penalty_secs: i64,
    /// Vehicles seeded per floor at start.
    pub agvs_per_floor: usize,
    /// Completed-task interval between HEARTBEAT rows and progress logs.
    pub heartbeat_every: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            zone_capacity: 4,
            retry_penalty_secs: 60,
            agvs_per_floor: 66,
            heartbeat_every: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReserveConfig {
    /// Seconds of history kept behind the slowest AGV's clock.
    pub retention_secs: i64,
    /// Completed-task interval between retention sweeps.
    pub cleanup_every: usize,
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60,
            cleanup_every: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// RNG seed; identical seed + input ⇒ bit-identical logs.
    pub seed: u64,
    /// Teleport count above which the run is flagged unhealthy in the logs.
    pub teleport_warn_threshold: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            teleport_warn_threshold: 50,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub timing: TimingConfig,
    pub path: PathConfig,
    pub dispatch: DispatchConfig,
    pub reserve: ReserveConfig,
    pub engine: EngineConfig,
}

/// Config path discovery: working directory only. The binary's `--config`
/// flag is the escape hatch for anything fancier.
pub fn discover() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}

pub fn load_from(path: Option<PathBuf>) -> Result<SimConfig> {
    let path = path.unwrap_or_else(discover);
    load_path(&path)
}

fn load_path(path: &Path) -> Result<SimConfig> {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str::<SimConfig>(&content) {
            Ok(cfg) => {
                info!(target: "config", path = %path.display(), "loaded configuration");
                Ok(cfg)
            }
            Err(err) => {
                warn!(target: "config", path = %path.display(), %err, "config parse failed, using defaults");
                Ok(SimConfig::default())
            }
        },
        Err(_) => Ok(SimConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_production_parameter_set() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.timing.shelf_handling_secs, 5);
        assert_eq!(cfg.timing.shuffle_step_secs, 10);
        assert_eq!(cfg.path.dynamic_horizon_secs, 60);
        assert_eq!(cfg.path.tunnel_cost, 50);
        assert_eq!(cfg.dispatch.zone_capacity, 4);
        assert_eq!(cfg.reserve.retention_secs, 60);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[path]\ndynamic_horizon_secs = 90\n\n[engine]\nseed = 42").unwrap();
        let cfg = load_from(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(cfg.path.dynamic_horizon_secs, 90);
        assert_eq!(cfg.engine.seed, 42);
        // Untouched sections keep their defaults.
        assert_eq!(cfg.path.heuristic_weight, 2);
        assert_eq!(cfg.timing.park_wait_secs, 5);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[timing]\nshelf_handling_secs = 6\nfuture_knob = true").unwrap();
        let cfg = load_from(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(cfg.timing.shelf_handling_secs, 6);
    }

    #[test]
    fn garbage_file_falls_back_to_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "this is not toml [[[").unwrap();
        let cfg = load_from(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(cfg.engine.seed, SimConfig::default().engine.seed);
    }

    #[test]
    fn missing_file_is_fine() {
        let cfg = load_from(Some(PathBuf::from("/definitely/not/here.toml"))).unwrap();
        assert_eq!(cfg.dispatch.agvs_per_floor, 66);
    }
}
