//! # Rule Engine
//!
//! User-defined alert rules evaluated against every telemetry event.
//!
//! A rule is an ordered list of [`Condition`]s joined by logical AND plus a single
//! [`Action`]. Rules are stored as JSON text (see [`crate::store::StoredRule`]) and
//! decoded on every pass, so a row that no longer parses is reported and skipped
//! without affecting the other rules.
//!
//! ```text
//! event ──► RuleMatches (parse + AND of conditions, store order)
//!              │ Ok(rule)                 │ Err(RuleParse)
//!              ▼                          ▼
//!          dispatch(action) ──► ChannelSender     logged, skipped
//!              │
//!              ▼
//!   battery metric present? ──► BatteryDrainMonitor
//! ```
//!
//! The engine is synchronous and holds no locks; the pipeline runs it from a single
//! consumer task.

mod action;
mod condition;
mod engine;
mod errors;
mod matcher;

pub use action::{dispatch, render_template, Action, Notification, NOT_AVAILABLE, PLACEHOLDERS};
pub use condition::{Condition, Operator};
pub use engine::{EvaluationReport, RuleEngine};
pub use errors::EngineError;
pub use matcher::RuleMatches;

use std::fmt;

use crate::store::StoredRule;
use crate::telemetry::TelemetryEvent;

/// A decoded rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: u64,
    pub alias: String,
    pub conditions: Vec<Condition>,
    pub action: Action,
}

impl Rule {
    /// All conditions hold, checked in order and stopping at the first failure. A rule
    /// with no conditions always matches.
    pub fn matches(&self, event: &TelemetryEvent) -> bool {
        self.conditions.iter().all(|c| c.evaluate(event))
    }
}

impl TryFrom<&StoredRule> for Rule {
    type Error = EngineError;

    fn try_from(stored: &StoredRule) -> Result<Self, Self::Error> {
        let parse_err = |reason: String| EngineError::RuleParse {
            rule_id: stored.id,
            reason,
        };
        let conditions = Condition::parse_list(&stored.conditions_json).map_err(parse_err)?;
        let action = Action::parse(&stored.action_json).map_err(parse_err)?;
        Ok(Rule {
            id: stored.id,
            alias: stored.alias.clone(),
            conditions,
            action,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conditions = self
            .conditions
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" AND ");
        write!(
            f,
            "'{}': IF ({}) THEN {}",
            self.alias,
            if conditions.is_empty() { "always" } else { conditions.as_str() },
            self.action
        )
    }
}
