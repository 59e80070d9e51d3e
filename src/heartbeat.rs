//! Silent-node detection.
//!
//! Nodes that have not reported for longer than the configured silence get a
//! CRITICAL alert. A node is alerted once per silence: while its latest alert still
//! carries [`NODE_SILENT_MARKER`] and was raised after the node was last heard, no new
//! one is written. Any packet from the node ends the silence, so the next one alerts
//! again.

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use crate::logutil::escape_log;
use crate::metrics;
use crate::store::{AlertKind, AlertRecord, MonitorStore, RuleStore, Severity, StoreError};

pub const NODE_SILENT_MARKER: &str = "Node silent";

/// Raise alerts for registered nodes silent for longer than `silence`.
///
/// The local node (the radio the monitor is attached to) is never checked.
pub fn check_node_heartbeats(
    store: &MonitorStore,
    now: DateTime<Utc>,
    local_node_id: Option<&str>,
    silence: Duration,
) -> Result<Vec<AlertRecord>, StoreError> {
    debug!("Checking node heartbeats");
    let mut raised = Vec::new();
    for node in store.list_nodes()? {
        if local_node_id == Some(node.node_id.as_str()) {
            continue;
        }
        if now.signed_duration_since(node.last_seen) <= silence {
            continue;
        }
        let last = store.last_alert_for_node(&node.node_id)?;
        let already_alerted = matches!(
            last,
            Some(ref alert)
                if alert.message.contains(NODE_SILENT_MARKER) && alert.timestamp >= node.last_seen
        );
        if already_alerted {
            continue;
        }
        let message = format!(
            "{}: no data reported for more than {} minutes.",
            NODE_SILENT_MARKER,
            silence.num_minutes()
        );
        let alert = store.insert_alert(
            &node.node_id,
            &message,
            Severity::Critical,
            AlertKind::NodeSilent,
            now,
        )?;
        metrics::inc_alerts_raised();
        warn!("Node {} ({}): {}", escape_log(&node.alias), node.node_id, message);
        raised.push(alert);
    }
    Ok(raised)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn silent_nodes_alert_once_and_local_node_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let store = MonitorStore::open(dir.path()).expect("store");
        let now = Utc::now();
        store
            .touch_node("!local", "Base", now - Duration::hours(3))
            .expect("touch");
        store
            .touch_node("!quiet", "Hilltop", now - Duration::minutes(45))
            .expect("touch");
        store
            .touch_node("!chatty", "Garden", now - Duration::minutes(5))
            .expect("touch");

        let silence = Duration::minutes(30);
        let raised = check_node_heartbeats(&store, now, Some("!local"), silence).expect("check");
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].node_id, "!quiet");
        assert_eq!(raised[0].severity, Severity::Critical);
        assert_eq!(raised[0].kind, AlertKind::NodeSilent);

        let again = check_node_heartbeats(&store, now, Some("!local"), silence).expect("check");
        assert!(again.is_empty());
    }

    #[test]
    fn newer_unrelated_alert_reenables_silence_alert() {
        let dir = TempDir::new().expect("tempdir");
        let store = MonitorStore::open(dir.path()).expect("store");
        let now = Utc::now();
        store
            .touch_node("!n", "Hilltop", now - Duration::hours(1))
            .expect("touch");
        let silence = Duration::minutes(30);
        assert_eq!(check_node_heartbeats(&store, now, None, silence).unwrap().len(), 1);

        store
            .insert_alert(
                "!n",
                "Rapid battery drain detected",
                Severity::Warning,
                AlertKind::RapidBatteryDrain,
                now,
            )
            .expect("insert");
        assert_eq!(check_node_heartbeats(&store, now, None, silence).unwrap().len(), 1);
    }

    #[test]
    fn second_silence_after_recovery_alerts_again() {
        let dir = TempDir::new().expect("tempdir");
        let store = MonitorStore::open(dir.path()).expect("store");
        let silence = Duration::minutes(30);
        let now = Utc::now();
        store
            .touch_node("!n", "Hilltop", now - Duration::hours(2))
            .expect("touch");
        assert_eq!(check_node_heartbeats(&store, now, None, silence).unwrap().len(), 1);

        // The node comes back, then goes quiet again.
        let back = now + Duration::minutes(10);
        store.touch_node("!n", "Hilltop", back).expect("touch");
        assert!(check_node_heartbeats(&store, back + Duration::minutes(5), None, silence)
            .unwrap()
            .is_empty());

        let later = back + Duration::hours(2);
        let raised = check_node_heartbeats(&store, later, None, silence).expect("check");
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].timestamp, later);
        assert!(check_node_heartbeats(&store, later, None, silence)
            .unwrap()
            .is_empty());
        assert_eq!(store.list_alerts(10).unwrap().len(), 2);
    }
}
