//! Rule actions and their dispatch.
//!
//! Actions are a closed set. Stored encoding is a JSON object tagged by `type`:
//!
//! ```json
//! {"type": "notify_channel", "channel_name": "alerts", "message": "Hot at {node_alias}: {temperature}C"}
//! ```
//!
//! Parameters are optional at the type level on purpose: a stored action with a
//! missing channel or message still parses, and the problem is reported at dispatch
//! time as an [`EngineError::ActionConfig`].

use log::info;
use serde::{Deserialize, Serialize};

use super::errors::EngineError;
use crate::channel::ChannelSender;
use crate::logutil::escape_log;
use crate::telemetry::{metric, TelemetryEvent};

/// Substituted for placeholders whose metric is absent or null.
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholders a message template may reference.
pub const PLACEHOLDERS: [&str; 5] = [
    "node_alias",
    metric::TEMPERATURE,
    metric::HUMIDITY,
    metric::PRESSURE,
    metric::BATTERY,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    NotifyChannel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_name: Option<String>,
        #[serde(default, rename = "message", skip_serializing_if = "Option::is_none")]
        message_template: Option<String>,
    },
}

impl Action {
    pub fn notify(channel_name: impl Into<String>, message_template: impl Into<String>) -> Self {
        Action::NotifyChannel {
            channel_name: Some(channel_name.into()),
            message_template: Some(message_template.into()),
        }
    }

    pub fn parse(json: &str) -> Result<Action, String> {
        serde_json::from_str(json).map_err(|e| format!("action: {}", e))
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::NotifyChannel {
                channel_name,
                message_template,
            } => write!(
                f,
                "notify #{}: \"{}\"",
                channel_name.as_deref().unwrap_or("?"),
                message_template.as_deref().unwrap_or("")
            ),
        }
    }
}

/// A notification that was handed to the channel sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub rule_id: u64,
    pub channel: String,
    pub text: String,
}

/// Execute `action` for the rule `rule_id` against the triggering event.
pub fn dispatch<C: ChannelSender + ?Sized>(
    rule_id: u64,
    action: &Action,
    event: &TelemetryEvent,
    sender: &C,
) -> Result<Notification, EngineError> {
    match action {
        Action::NotifyChannel {
            channel_name,
            message_template,
        } => {
            let channel = channel_name.as_deref().filter(|c| !c.is_empty());
            let template = message_template.as_deref().filter(|m| !m.is_empty());
            let (Some(channel), Some(template)) = (channel, template) else {
                return Err(EngineError::ActionConfig {
                    rule_id,
                    reason: "notify_channel requires channel_name and message".to_string(),
                });
            };
            let text = render_template(template, event)
                .map_err(|reason| EngineError::ActionConfig { rule_id, reason })?;
            sender
                .send_to_channel(channel, &text)
                .map_err(|source| EngineError::SendFailure {
                    rule_id,
                    channel: channel.to_string(),
                    source,
                })?;
            info!(
                "Notification queued for channel '{}': {}",
                escape_log(channel),
                escape_log(&text)
            );
            Ok(Notification {
                rule_id,
                channel: channel.to_string(),
                text,
            })
        }
    }
}

/// Interpolate `{placeholder}` names from the event. `{{` and `}}` are literal braces;
/// unknown placeholders and unbalanced braces are errors.
///
/// Metric placeholders accept a fixed-precision suffix, `{temperature:.1f}`. No other
/// format spec is supported, and `node_alias` takes none. A missing metric renders as
/// [`NOT_AVAILABLE`] whatever the precision.
pub fn render_template(template: &str, event: &TelemetryEvent) -> Result<String, String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => return Err("unclosed '{' in message template".to_string()),
                    }
                }
                out.push_str(&placeholder_value(&name, event)?);
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err("single '}' in message template".to_string()),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Digits requested by a `.Nf` spec.
fn precision(spec: &str) -> Option<usize> {
    spec.strip_prefix('.')?.strip_suffix('f')?.parse().ok()
}

fn placeholder_value(placeholder: &str, event: &TelemetryEvent) -> Result<String, String> {
    let (name, spec) = match placeholder.split_once(':') {
        Some((name, spec)) => (name, Some(spec)),
        None => (placeholder, None),
    };
    match name {
        "node_alias" if spec.is_none() => Ok(event.display_alias()),
        metric::TEMPERATURE | metric::HUMIDITY | metric::PRESSURE | metric::BATTERY => {
            let digits = match spec {
                None => None,
                Some(spec) => Some(precision(spec).ok_or_else(|| {
                    format!(
                        "unsupported format '{}' in '{{{}}}' (only .Nf is allowed)",
                        spec, placeholder
                    )
                })?),
            };
            Ok(match (event.metric(name), digits) {
                (None, _) => NOT_AVAILABLE.to_string(),
                (Some(v), None) => v.to_string(),
                (Some(v), Some(n)) => format!("{:.*}", n, v),
            })
        }
        "node_alias" => Err(format!("'{{{}}}' takes no format", placeholder)),
        other => Err(format!(
            "unknown placeholder '{{{}}}' (expected one of {})",
            other,
            PLACEHOLDERS.join(", ")
        )),
    }
}
