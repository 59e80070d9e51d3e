//! Telemetry events and packet normalization.
//!
//! A [`TelemetryEvent`] is one normalized snapshot of a node's sensor readings. Events
//! are produced from decoded Meshtastic packets (the JSON shape emitted by the
//! Meshtastic device libraries) and are never persisted directly; only the derived
//! readings are written to the store.
//!
//! Normalization rules:
//! - environment metrics are rounded to two decimals
//! - `batteryLevel` is clamped to `[0, 100]` (devices report 101 while charging)
//! - only `TELEMETRY_APP` packets produce an event
//!
//! Packet-level handling (sender bookkeeping, text and position payloads) lives in
//! [`crate::packet`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Well-known metric names.
pub mod metric {
    pub const TEMPERATURE: &str = "temperature";
    pub const HUMIDITY: &str = "humidity";
    pub const PRESSURE: &str = "pressure";
    pub const IAQ: &str = "iaq";
    pub const BATTERY: &str = "battery";

    /// Metrics accepted by the condition shorthand and shown in rule listings.
    pub const ALL: [&str; 5] = [TEMPERATURE, HUMIDITY, PRESSURE, IAQ, BATTERY];
}

pub const TELEMETRY_PORTNUM: &str = "TELEMETRY_APP";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("packet has no sender id")]
    MissingSender,

    #[error("not a telemetry packet (portnum {0})")]
    NotTelemetry(String),
}

/// One normalized telemetry snapshot for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub node_id: String,
    pub alias: Option<String>,
    /// Metric name -> value. A present key with `None` is a reading the node sent as null.
    pub metrics: BTreeMap<String, Option<f64>>,
}

impl TelemetryEvent {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            alias: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_metric(mut self, name: &str, value: impl Into<Option<f64>>) -> Self {
        self.set_metric(name, value);
        self
    }

    pub fn set_metric(&mut self, name: &str, value: impl Into<Option<f64>>) {
        self.metrics.insert(name.to_string(), value.into());
    }

    /// Value of `name`, or `None` when the metric is absent or null.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }

    /// Non-null readings only.
    pub fn readings(&self) -> BTreeMap<String, f64> {
        self.metrics
            .iter()
            .filter_map(|(k, v)| v.map(|v| (k.clone(), v)))
            .collect()
    }

    /// Alias when known, otherwise the last four characters of the node id.
    pub fn display_alias(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => crate::logutil::short_node(&self.node_id).to_string(),
        }
    }

    /// Build an event from a decoded Meshtastic packet.
    ///
    /// `alias` is the alias the caller already knows for the sender, if any.
    pub fn from_packet(packet: &Value, alias: Option<String>) -> Result<Self, TelemetryError> {
        let node_id = packet
            .get("fromId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(TelemetryError::MissingSender)?;

        let decoded = packet.get("decoded");
        let portnum = decoded
            .and_then(|d| d.get("portnum"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if portnum != TELEMETRY_PORTNUM {
            return Err(TelemetryError::NotTelemetry(portnum.to_string()));
        }

        let mut event = TelemetryEvent::new(node_id);
        event.alias = alias;

        let telemetry = decoded.and_then(|d| d.get("telemetry"));
        if let Some(env) = telemetry.and_then(|t| t.get("environmentMetrics")) {
            for (source, target) in [
                ("temperature", metric::TEMPERATURE),
                ("relativeHumidity", metric::HUMIDITY),
                ("barometricPressure", metric::PRESSURE),
                ("gasResistance", metric::IAQ),
            ] {
                if let Some(raw) = env.get(source) {
                    event.set_metric(target, raw.as_f64().map(round2));
                }
            }
        }
        if let Some(level) = telemetry
            .and_then(|t| t.get("deviceMetrics"))
            .and_then(|dm| dm.get("batteryLevel"))
        {
            event.set_metric(metric::BATTERY, level.as_f64().map(|v| v.clamp(0.0, 100.0)));
        }

        Ok(event)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
