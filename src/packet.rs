//! Decoded mesh packets.
//!
//! Every packet that names its sender counts as a sign of life for that node: the
//! pipeline refreshes the node record and its radio stats before looking at the
//! payload. Only telemetry payloads reach the rule engine; text messages and
//! positions are stored, anything else is just a heartbeat.

use serde_json::Value;
use thiserror::Error;

use crate::telemetry::{metric, TelemetryEvent, TELEMETRY_PORTNUM};

pub const TEXT_PORTNUM: &str = "TEXT_MESSAGE_APP";
pub const POSITION_PORTNUM: &str = "POSITION_APP";

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet has no sender id")]
    MissingSender,
}

/// Radio stats carried in the packet envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkStats {
    pub snr: Option<f64>,
    pub rssi: Option<i32>,
    pub hop_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub to: Option<String>,
    pub channel: u32,
    pub text: String,
    pub direct: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Telemetry(TelemetryEvent),
    Text(TextMessage),
    Position(Position),
    /// Any other port, or a known port without usable content. Holds the portnum.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshPacket {
    pub from: String,
    pub link: LinkStats,
    pub payload: Payload,
}

impl MeshPacket {
    pub fn from_value(packet: &Value) -> Result<Self, PacketError> {
        let from = packet
            .get("fromId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(PacketError::MissingSender)?
            .to_string();

        let link = LinkStats {
            snr: packet.get("snr").and_then(Value::as_f64),
            rssi: packet
                .get("rssi")
                .and_then(Value::as_i64)
                .and_then(|v| i32::try_from(v).ok()),
            hop_limit: packet
                .get("hopLimit")
                .and_then(Value::as_u64)
                .and_then(|v| u32::try_from(v).ok()),
        };

        let decoded = packet.get("decoded");
        let portnum = decoded
            .and_then(|d| d.get("portnum"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let payload = match portnum.as_str() {
            TELEMETRY_PORTNUM => match TelemetryEvent::from_packet(packet, None) {
                Ok(event) => Payload::Telemetry(event),
                Err(_) => Payload::Other(portnum),
            },
            TEXT_PORTNUM => Payload::Text(text_message(packet, decoded)),
            POSITION_PORTNUM => match decoded.and_then(position) {
                Some(pos) => Payload::Position(pos),
                None => Payload::Other(portnum),
            },
            _ => Payload::Other(portnum),
        };

        Ok(Self {
            from,
            link,
            payload,
        })
    }

    /// Battery level reported in this packet, if it carried device metrics.
    pub fn battery(&self) -> Option<f64> {
        match &self.payload {
            Payload::Telemetry(event) => event.metric(metric::BATTERY),
            _ => None,
        }
    }

    pub fn portnum(&self) -> &str {
        match &self.payload {
            Payload::Telemetry(_) => TELEMETRY_PORTNUM,
            Payload::Text(_) => TEXT_PORTNUM,
            Payload::Position(_) => POSITION_PORTNUM,
            Payload::Other(port) => port,
        }
    }
}

/// A bare telemetry event, as if received without envelope stats.
impl From<TelemetryEvent> for MeshPacket {
    fn from(event: TelemetryEvent) -> Self {
        Self {
            from: event.node_id.clone(),
            link: LinkStats::default(),
            payload: Payload::Telemetry(event),
        }
    }
}

fn text_message(packet: &Value, decoded: Option<&Value>) -> TextMessage {
    let text = decoded
        .and_then(|d| d.get("text").or_else(|| d.get("payload")))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let to = packet
        .get("toId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            packet
                .get("to")
                .and_then(Value::as_u64)
                .map(|n| format!("!{:08x}", n))
        });
    TextMessage {
        to,
        channel: packet
            .get("channel")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0),
        text,
        direct: packet
            .get("isDirect")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// Integer coordinates are in 1e-7 degrees. A zero coordinate means "no fix".
fn position(decoded: &Value) -> Option<Position> {
    let pos = decoded.get("position")?;
    let lat = pos.get("latitudeI")?.as_i64()? as f64 / 1e7;
    let lon = pos.get("longitudeI")?.as_i64()? as f64 / 1e7;
    if lat == 0.0 || lon == 0.0 {
        return None;
    }
    Some(Position {
        latitude: lat,
        longitude: lon,
    })
}

/// Parse one JSON-lines packet. Blank lines yield `Ok(None)`.
pub fn parse_packet_line(line: &str) -> Result<Option<MeshPacket>, PacketError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let packet: Value = serde_json::from_str(trimmed)?;
    MeshPacket::from_value(&packet).map(Some)
}
