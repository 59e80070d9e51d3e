use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use super::action::{dispatch, Notification};
use super::errors::EngineError;
use super::matcher::RuleMatches;
use crate::battery::{BatteryDrainMonitor, DrainOutcome};
use crate::channel::ChannelSender;
use crate::logutil::{escape_log, short_node};
use crate::metrics;
use crate::store::{AlertRecord, RuleStore};
use crate::telemetry::{metric, TelemetryEvent};

/// What one call to [`RuleEngine::process_event`] did.
#[derive(Debug, Default)]
pub struct EvaluationReport {
    /// Stored rules looked at (parsable or not).
    pub rules_considered: usize,
    /// Ids of rules whose conditions all held, in evaluation order.
    pub matched: Vec<u64>,
    pub dispatched: Vec<Notification>,
    /// Recoverable errors, already logged.
    pub errors: Vec<EngineError>,
    /// Present when the event carried a battery reading.
    pub battery: Option<DrainOutcome>,
}

impl EvaluationReport {
    pub fn raised_alert(&self) -> Option<&AlertRecord> {
        match &self.battery {
            Some(DrainOutcome::Alerted { alert, .. }) => Some(alert),
            _ => None,
        }
    }
}

/// Rule matcher, action dispatcher and battery monitor wired to their collaborators.
pub struct RuleEngine<S, C> {
    store: S,
    sender: C,
    battery: BatteryDrainMonitor,
}

impl<S: RuleStore, C: ChannelSender> RuleEngine<S, C> {
    pub fn new(store: S, sender: C, battery: BatteryDrainMonitor) -> Self {
        Self {
            store,
            sender,
            battery,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sender(&self) -> &C {
        &self.sender
    }

    pub fn battery(&self) -> &BatteryDrainMonitor {
        &self.battery
    }

    /// Evaluate every stored rule against `event`, dispatch the actions of those that
    /// match, then feed the battery reading (if any) to the drain monitor.
    ///
    /// Never fails: problems are logged and collected in the report.
    pub fn process_event(&mut self, event: &TelemetryEvent, now: DateTime<Utc>) -> EvaluationReport {
        metrics::inc_events_processed();
        let mut report = EvaluationReport::default();
        let node = short_node(&event.node_id);

        match self.store.list_rules() {
            Ok(rules) => {
                debug!("Evaluating {} rules for node {}", rules.len(), node);
                report.rules_considered = rules.len();
                for item in RuleMatches::new(event, &rules) {
                    let rule = match item {
                        Ok(rule) => rule,
                        Err(e) => {
                            error!("{}", e);
                            report.errors.push(e);
                            continue;
                        }
                    };
                    info!(
                        "Rule '{}' matched for node {}; executing action",
                        escape_log(&rule.alias),
                        node
                    );
                    report.matched.push(rule.id);
                    match dispatch(rule.id, &rule.action, event, &self.sender) {
                        Ok(sent) => report.dispatched.push(sent),
                        Err(e) => {
                            match &e {
                                EngineError::ActionConfig { .. } => {
                                    metrics::inc_action_config_errors();
                                    error!("{}", e);
                                }
                                _ => warn!("{}", e),
                            }
                            report.errors.push(e);
                        }
                    }
                }
            }
            Err(e) => {
                error!("Cannot load rules for node {}: {}", node, e);
                report.errors.push(e.into());
            }
        }

        if let Some(level) = event.metric(metric::BATTERY) {
            match self.battery.observe(&self.store, &event.node_id, level, now) {
                Ok(outcome) => report.battery = Some(outcome),
                Err(e) => {
                    error!("Battery check failed for node {}: {}", node, e);
                    report.errors.push(e.into());
                }
            }
        }

        report
    }
}
