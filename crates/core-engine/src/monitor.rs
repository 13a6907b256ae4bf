//! Run-health accounting.
//!
//! Counts per-segment successes and forced teleports by `<label>:<reason>`,
//! and narrates progress through `tracing`. A teleport is legal output, but
//! a pile of them means the input (or a tuning knob) is unhealthy — the
//! monitor warns once past the configured threshold, and tests assert the
//! totals stay bounded for well-formed scenarios.

use crate::mover::TeleReason;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug)]
pub struct LiveMonitor {
    completed: u64,
    successes: BTreeMap<&'static str, u64>,
    teleports: BTreeMap<String, u64>,
    warn_threshold: u64,
    warned: bool,
}

impl LiveMonitor {
    pub fn new(warn_threshold: u64) -> Self {
        Self {
            completed: 0,
            successes: BTreeMap::new(),
            teleports: BTreeMap::new(),
            warn_threshold,
            warned: false,
        }
    }

    pub fn log_success(&mut self, label: &'static str) {
        *self.successes.entry(label).or_default() += 1;
    }

    pub fn log_teleport(&mut self, label: &str, reason: TeleReason) {
        *self
            .teleports
            .entry(format!("{label}:{}", reason.as_str()))
            .or_default() += 1;
        let total = self.teleport_total();
        if !self.warned && total > self.warn_threshold {
            self.warned = true;
            warn!(
                target: "monitor",
                total,
                threshold = self.warn_threshold,
                "forced-teleport volume exceeds the healthy-input threshold"
            );
        }
    }

    pub fn task_completed(&mut self) {
        self.completed += 1;
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn teleport_total(&self) -> u64 {
        self.teleports.values().sum()
    }

    /// Teleport count for one reason across all segment labels.
    pub fn teleports_for(&self, reason: TeleReason) -> u64 {
        let suffix = reason.as_str();
        self.teleports
            .iter()
            .filter(|(k, _)| k.ends_with(suffix))
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn progress(&self, floor: &str, done: usize, left: usize) {
        let worst = self
            .teleports
            .iter()
            .max_by_key(|(_, v)| **v)
            .map(|(k, v)| format!("{k}={v}"))
            .unwrap_or_else(|| "none".to_string());
        info!(
            target: "monitor",
            floor,
            done,
            left,
            teleports = self.teleport_total(),
            worst_teleport = %worst,
            "progress"
        );
    }

    pub fn final_report(&self) {
        info!(
            target: "monitor",
            completed = self.completed,
            teleports = self.teleport_total(),
            successes = ?self.successes,
            "run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teleports_are_counted_by_label_and_reason() {
        let mut m = LiveMonitor::new(10);
        m.log_teleport("LOAD", TeleReason::NoPath);
        m.log_teleport("LOAD", TeleReason::NoPath);
        m.log_teleport("QUEUE", TeleReason::Deadlock);
        assert_eq!(m.teleport_total(), 3);
        assert_eq!(m.teleports_for(TeleReason::NoPath), 2);
        assert_eq!(m.teleports_for(TeleReason::Deadlock), 1);
        assert_eq!(m.teleports_for(TeleReason::Unreachable), 0);
    }
}
