//! Battery drain detection.
//!
//! Each node moves from `Unseen` to `Tracking` on its first battery reading. While
//! tracking, a reading that arrives more than [`DrainPolicy::window`] after the
//! checkpoint is compared against it; the checkpoint is then replaced whether or not
//! an alert fired. Readings inside the window leave the checkpoint alone, so drain is
//! always measured over at least one full window.
//!
//! Checkpoints are held in memory only and are lost on restart.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use crate::config::BatteryConfig;
use crate::logutil::short_node;
use crate::metrics;
use crate::store::{AlertKind, AlertRecord, RuleStore, Severity, StoreError};

/// Text every rapid-drain alert starts with. A node whose latest alert contains it
/// gets no further drain alerts.
pub const RAPID_DRAIN_MARKER: &str = "Rapid battery drain";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrainPolicy {
    /// Minimum time between two compared readings.
    pub window: Duration,
    /// Drop in percentage points that must be exceeded to alert.
    pub threshold: f64,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            window: Duration::minutes(50),
            threshold: 15.0,
        }
    }
}

impl From<&BatteryConfig> for DrainPolicy {
    fn from(cfg: &BatteryConfig) -> Self {
        Self {
            window: Duration::minutes(cfg.drain_window_minutes as i64),
            threshold: cfg.drain_threshold_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryCheckpoint {
    pub level: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeDrainState {
    Unseen,
    Tracking(BatteryCheckpoint),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// First reading for the node; checkpoint created.
    FirstReading,
    /// Window not yet elapsed; checkpoint kept.
    WithinWindow,
    /// Window elapsed and the drop stayed under the threshold.
    Checked { drain: f64 },
    /// Drop exceeded the threshold but the node's latest alert already reports it.
    Suppressed { drain: f64 },
    Alerted { drain: f64, alert: AlertRecord },
}

/// Per-node battery checkpoints and the drain check that uses them.
#[derive(Debug, Default)]
pub struct BatteryDrainMonitor {
    policy: DrainPolicy,
    checkpoints: HashMap<String, BatteryCheckpoint>,
}

impl BatteryDrainMonitor {
    pub fn new(policy: DrainPolicy) -> Self {
        Self {
            policy,
            checkpoints: HashMap::new(),
        }
    }

    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    pub fn state(&self, node_id: &str) -> NodeDrainState {
        match self.checkpoints.get(node_id) {
            Some(cp) => NodeDrainState::Tracking(*cp),
            None => NodeDrainState::Unseen,
        }
    }

    pub fn tracked_nodes(&self) -> usize {
        self.checkpoints.len()
    }

    /// Feed one battery reading taken at `now`.
    pub fn observe<S: RuleStore + ?Sized>(
        &mut self,
        store: &S,
        node_id: &str,
        level: f64,
        now: DateTime<Utc>,
    ) -> Result<DrainOutcome, StoreError> {
        let Some(previous) = self.checkpoints.get(node_id).copied() else {
            self.checkpoints
                .insert(node_id.to_string(), BatteryCheckpoint { level, at: now });
            debug!("Battery tracking started for {} at {}%", short_node(node_id), level);
            return Ok(DrainOutcome::FirstReading);
        };

        let elapsed = now.signed_duration_since(previous.at);
        if elapsed <= self.policy.window {
            return Ok(DrainOutcome::WithinWindow);
        }

        self.checkpoints
            .insert(node_id.to_string(), BatteryCheckpoint { level, at: now });
        let drain = previous.level - level;
        if drain <= self.policy.threshold {
            return Ok(DrainOutcome::Checked { drain });
        }

        let last = store.last_alert_for_node(node_id)?;
        if matches!(last, Some(ref alert) if alert.message.contains(RAPID_DRAIN_MARKER)) {
            info!(
                "Battery on {} dropped {}% but a drain alert is already the latest; suppressed",
                short_node(node_id),
                drain
            );
            return Ok(DrainOutcome::Suppressed { drain });
        }

        let message = format!(
            "{} detected ({}% in ~{} min).",
            RAPID_DRAIN_MARKER,
            drain,
            elapsed.num_minutes()
        );
        let alert = store.insert_alert(
            node_id,
            &message,
            Severity::Warning,
            AlertKind::RapidBatteryDrain,
            now,
        )?;
        metrics::inc_alerts_raised();
        warn!("Node {}: {}", short_node(node_id), message);
        Ok(DrainOutcome::Alerted { drain, alert })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MonitorStore;
    use tempfile::TempDir;

    fn open() -> (TempDir, MonitorStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = MonitorStore::open(dir.path()).expect("store");
        (dir, store)
    }

    #[test]
    fn readings_inside_window_keep_checkpoint() {
        let (_dir, store) = open();
        let mut monitor = BatteryDrainMonitor::new(DrainPolicy::default());
        let t0 = Utc::now();
        monitor.observe(&store, "!n", 90.0, t0).unwrap();
        let outcome = monitor
            .observe(&store, "!n", 50.0, t0 + Duration::minutes(49))
            .unwrap();
        assert_eq!(outcome, DrainOutcome::WithinWindow);
        assert_eq!(
            monitor.state("!n"),
            NodeDrainState::Tracking(BatteryCheckpoint { level: 90.0, at: t0 })
        );
    }

    #[test]
    fn exactly_window_is_not_elapsed() {
        let (_dir, store) = open();
        let mut monitor = BatteryDrainMonitor::new(DrainPolicy::default());
        let t0 = Utc::now();
        monitor.observe(&store, "!n", 90.0, t0).unwrap();
        let outcome = monitor
            .observe(&store, "!n", 10.0, t0 + Duration::minutes(50))
            .unwrap();
        assert_eq!(outcome, DrainOutcome::WithinWindow);
    }

    #[test]
    fn small_drop_replaces_checkpoint_without_alert() {
        let (_dir, store) = open();
        let mut monitor = BatteryDrainMonitor::new(DrainPolicy::default());
        let t0 = Utc::now();
        monitor.observe(&store, "!n", 80.0, t0).unwrap();
        let t1 = t0 + Duration::minutes(55);
        let outcome = monitor.observe(&store, "!n", 65.0, t1).unwrap();
        assert_eq!(outcome, DrainOutcome::Checked { drain: 15.0 });
        assert_eq!(
            monitor.state("!n"),
            NodeDrainState::Tracking(BatteryCheckpoint { level: 65.0, at: t1 })
        );
        assert!(store.list_alerts(10).unwrap().is_empty());
    }

    #[test]
    fn custom_policy_from_config() {
        let cfg = BatteryConfig {
            drain_window_minutes: 10,
            drain_threshold_percent: 5.0,
        };
        let policy = DrainPolicy::from(&cfg);
        assert_eq!(policy.window, Duration::minutes(10));
        assert_eq!(policy.threshold, 5.0);
    }
}
