use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RULE_SCHEMA_VERSION: u8 = 1;
pub const ALERT_SCHEMA_VERSION: u8 = 1;
pub const NODE_SCHEMA_VERSION: u8 = 2;
pub const READING_SCHEMA_VERSION: u8 = 1;
pub const LINK_SCHEMA_VERSION: u8 = 1;
pub const MESSAGE_SCHEMA_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        })
    }
}

/// Category recorded alongside each alert. Display only; suppression of repeated
/// alerts still keys on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    RapidBatteryDrain,
    NodeSilent,
    Other,
}

/// A rule exactly as persisted. Conditions and action are kept as JSON text so that
/// rows written by older tools (or by hand) survive even when they no longer parse;
/// the rule engine reports those per rule instead of failing the whole listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRule {
    pub id: u64,
    pub alias: String,
    pub conditions_json: String,
    pub action_json: String,
    pub created_at: DateTime<Utc>,
    pub schema_version: u8,
}

/// Persisted alert. Append-only apart from the `read` flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub message: String,
    pub severity: Severity,
    pub kind: AlertKind,
    pub read: bool,
    pub schema_version: u8,
}

/// Latest known state of a node. Radio stats and position keep their previous value
/// when a packet does not carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub alias: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub battery: Option<f64>,
    pub snr: Option<f64>,
    pub rssi: Option<i32>,
    pub hops: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub schema_version: u8,
}

impl NodeRecord {
    pub(crate) fn new(node_id: &str, alias: &str, now: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.to_string(),
            alias: alias.to_string(),
            first_seen: now,
            last_seen: now,
            battery: None,
            snr: None,
            rssi: None,
            hops: None,
            latitude: None,
            longitude: None,
            schema_version: NODE_SCHEMA_VERSION,
        }
    }
}

/// Last heard radio link from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: String,
    pub target: String,
    pub last_snr: f64,
    pub last_seen: DateTime<Utc>,
    pub schema_version: u8,
}

/// A text message heard on the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: u64,
    pub from: String,
    pub to: Option<String>,
    pub channel: u32,
    pub text: String,
    pub direct: bool,
    pub timestamp: DateTime<Utc>,
    pub schema_version: u8,
}

/// Derived readings of one telemetry event (null metrics dropped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub id: u64,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
    pub schema_version: u8,
}
