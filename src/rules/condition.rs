//! Single metric/operator/threshold tests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::TelemetryEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Greater => ">",
            Operator::Less => "<",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        }
    }

    /// `==` and `!=` compare floats exactly, with no tolerance.
    #[allow(clippy::float_cmp)]
    pub fn apply(self, current: f64, threshold: f64) -> bool {
        match self {
            Operator::Greater => current > threshold,
            Operator::Less => current < threshold,
            Operator::Equal => current == threshold,
            Operator::NotEqual => current != threshold,
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Operator::Greater),
            "<" => Ok(Operator::Less),
            "==" => Ok(Operator::Equal),
            "!=" => Ok(Operator::NotEqual),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub metric: String,
    pub operator: Operator,
    pub value: f64,
}

/// Stored shape of a condition. Operator and value are loose so that a bad row
/// produces a readable reason instead of a bare serde error.
#[derive(Debug, Deserialize)]
struct RawCondition {
    metric: String,
    operator: String,
    value: Value,
}

impl Condition {
    pub fn new(metric: impl Into<String>, operator: Operator, value: f64) -> Self {
        Self {
            metric: metric.into(),
            operator,
            value,
        }
    }

    /// True when the event carries the metric and the comparison holds. An absent or
    /// null metric never matches, whatever the operator.
    pub fn evaluate(&self, event: &TelemetryEvent) -> bool {
        match event.metric(&self.metric) {
            Some(current) => self.operator.apply(current, self.value),
            None => false,
        }
    }

    /// Decode the stored JSON list of conditions.
    pub fn parse_list(json: &str) -> Result<Vec<Condition>, String> {
        let raw: Vec<RawCondition> =
            serde_json::from_str(json).map_err(|e| format!("conditions: {}", e))?;
        raw.into_iter().map(Condition::from_raw).collect()
    }

    fn from_raw(raw: RawCondition) -> Result<Condition, String> {
        let operator = raw.operator.parse::<Operator>()?;
        // Thresholds saved by older tools may be numeric strings.
        let value = match &raw.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            format!(
                "threshold for '{}' is not a number: {}",
                raw.metric, raw.value
            )
        })?;
        Ok(Condition {
            metric: raw.metric,
            operator,
            value,
        })
    }
}

/// Shorthand used by the CLI: `temperature>30`, `battery < 20`, `humidity==50`.
impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for symbol in ["==", "!=", ">", "<"] {
            if let Some(pos) = s.find(symbol) {
                let metric = s[..pos].trim();
                let threshold = s[pos + symbol.len()..].trim();
                if metric.is_empty() {
                    return Err(format!("missing metric in '{}'", s));
                }
                let value = threshold
                    .parse::<f64>()
                    .map_err(|_| format!("threshold '{}' is not a number", threshold))?;
                let operator = symbol.parse::<Operator>()?;
                return Ok(Condition::new(metric, operator, value));
            }
        }
        Err(format!("no operator (>, <, ==, !=) in '{}'", s))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.metric, self.operator, self.value)
    }
}
