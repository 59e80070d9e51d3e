/// Rule evaluation and dispatch against a real sled store.
mod common;

use chrono::Utc;
use common::{open_store, RecordingSender};
use meshwatch::battery::BatteryDrainMonitor;
use chrono::DateTime;
use meshwatch::rules::{Action, Condition, EngineError, Operator, RuleEngine};
use meshwatch::store::{
    AlertKind, AlertRecord, RuleRow, RuleStore, Severity, StoreError, StoredRule, UnreadableRule,
};
use meshwatch::telemetry::{metric, TelemetryEvent};

#[test]
fn test_hot_rule_notifies_with_temperature() {
    let (_dir, store) = open_store();
    let rule = store
        .add_rule(
            "Hot",
            &[Condition::new(metric::TEMPERATURE, Operator::Greater, 30.0)],
            &Action::notify("alerts", "Hot: {temperature}"),
        )
        .unwrap();

    let sender = RecordingSender::default();
    let mut engine = RuleEngine::new(&store, &sender, BatteryDrainMonitor::default());
    let event = TelemetryEvent::new("!433c1f6c").with_metric(metric::TEMPERATURE, 35.0);
    let report = engine.process_event(&event, Utc::now());

    assert_eq!(report.matched, vec![rule.id]);
    assert!(report.errors.is_empty());
    assert_eq!(sender.sent(), vec![("alerts".to_string(), "Hot: 35".to_string())]);
}

#[test]
fn test_null_metric_never_matches() {
    let (_dir, store) = open_store();
    store
        .add_rule(
            "Hot",
            &[Condition::new(metric::TEMPERATURE, Operator::Greater, 30.0)],
            &Action::notify("alerts", "Hot: {temperature}"),
        )
        .unwrap();
    store
        .add_rule(
            "Not freezing",
            &[Condition::new(metric::TEMPERATURE, Operator::NotEqual, 0.0)],
            &Action::notify("alerts", "{temperature}"),
        )
        .unwrap();

    let sender = RecordingSender::default();
    let mut engine = RuleEngine::new(&store, &sender, BatteryDrainMonitor::default());
    let event = TelemetryEvent::new("!n").with_metric(metric::TEMPERATURE, None::<f64>);
    let report = engine.process_event(&event, Utc::now());

    assert_eq!(report.rules_considered, 2);
    assert!(report.matched.is_empty());
    assert!(sender.sent().is_empty());
}

#[test]
fn test_malformed_rule_does_not_block_others() {
    let (_dir, store) = open_store();
    let action = Action::notify("primary", "{node_alias} battery {battery}");
    let low = [Condition::new(metric::BATTERY, Operator::Less, 20.0)];
    store.add_rule("first", &low, &action).unwrap();
    let broken = store
        .put_raw_rule("broken", "[{\"metric\": \"battery\", \"operator\": \"<\"", "{}")
        .unwrap();
    store.add_rule("second", &low, &action).unwrap();
    store.add_rule("third", &low, &action).unwrap();

    let sender = RecordingSender::default();
    let mut engine = RuleEngine::new(&store, &sender, BatteryDrainMonitor::default());
    let event = TelemetryEvent::new("!0000abcd")
        .with_alias("Hilltop")
        .with_metric(metric::BATTERY, 12.0);
    let report = engine.process_event(&event, Utc::now());

    assert_eq!(report.matched.len(), 3);
    assert_eq!(report.dispatched.len(), report.matched.len());
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        report.errors[0],
        EngineError::RuleParse { rule_id, .. } if rule_id == broken.id
    ));
    assert!(sender
        .sent()
        .iter()
        .all(|(ch, text)| ch == "primary" && text == "Hilltop battery 12"));
}

#[test]
fn test_all_conditions_must_hold() {
    let (_dir, store) = open_store();
    store
        .add_rule(
            "Muggy",
            &[
                Condition::new(metric::TEMPERATURE, Operator::Greater, 28.0),
                Condition::new(metric::HUMIDITY, Operator::Greater, 80.0),
            ],
            &Action::notify("alerts", "{temperature}C {humidity}% pressure {pressure}"),
        )
        .unwrap();

    let sender = RecordingSender::default();
    let mut engine = RuleEngine::new(&store, &sender, BatteryDrainMonitor::default());
    let dry = TelemetryEvent::new("!n")
        .with_metric(metric::TEMPERATURE, 31.0)
        .with_metric(metric::HUMIDITY, 40.0);
    assert!(engine.process_event(&dry, Utc::now()).matched.is_empty());

    let muggy = TelemetryEvent::new("!n")
        .with_metric(metric::TEMPERATURE, 31.0)
        .with_metric(metric::HUMIDITY, 85.5);
    let report = engine.process_event(&muggy, Utc::now());
    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(report.dispatched[0].text, "31C 85.5% pressure N/A");
}

#[test]
fn test_bad_action_is_reported_per_rule() {
    let (_dir, store) = open_store();
    let always: [Condition; 0] = [];
    store
        .put_raw_rule("no channel", "[]", "{\"type\": \"notify_channel\", \"message\": \"x\"}")
        .unwrap();
    store
        .add_rule("bad placeholder", &always, &Action::notify("alerts", "{wind}"))
        .unwrap();
    store
        .add_rule("fine", &always, &Action::notify("alerts", "ok"))
        .unwrap();

    let sender = RecordingSender::default();
    let mut engine = RuleEngine::new(&store, &sender, BatteryDrainMonitor::default());
    let report = engine.process_event(&TelemetryEvent::new("!n"), Utc::now());

    assert_eq!(report.matched.len(), 3);
    assert_eq!(report.dispatched.len(), 1);
    assert_eq!(report.errors.len(), 2);
    assert!(report
        .errors
        .iter()
        .all(|e| matches!(e, EngineError::ActionConfig { .. })));
    assert_eq!(sender.sent(), vec![("alerts".to_string(), "ok".to_string())]);
}

/// Rule store whose middle row cannot be decoded.
struct OneBadRow;

impl OneBadRow {
    fn rule(id: u64) -> StoredRule {
        StoredRule {
            id,
            alias: format!("rule-{}", id),
            conditions_json: "[]".into(),
            action_json: serde_json::to_string(&Action::notify("alerts", "fired")).unwrap(),
            created_at: Utc::now(),
            schema_version: 1,
        }
    }
}

impl RuleStore for OneBadRow {
    fn list_rules(&self) -> Result<Vec<RuleRow>, StoreError> {
        Ok(vec![
            Ok(Self::rule(1)),
            Err(UnreadableRule {
                rule_id: 2,
                source: StoreError::NotFound("truncated record".into()),
            }),
            Ok(Self::rule(3)),
        ])
    }

    fn last_alert_for_node(&self, _node_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        Ok(None)
    }

    fn insert_alert(
        &self,
        _node_id: &str,
        _message: &str,
        _severity: Severity,
        _kind: AlertKind,
        _now: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        Err(StoreError::NotFound("alerts".into()))
    }
}

#[test]
fn test_unreadable_row_skips_only_that_rule() {
    let sender = RecordingSender::default();
    let mut engine = RuleEngine::new(OneBadRow, &sender, BatteryDrainMonitor::default());
    let report = engine.process_event(&TelemetryEvent::new("!n"), Utc::now());

    assert_eq!(report.rules_considered, 3);
    assert_eq!(report.matched, vec![1, 3]);
    assert_eq!(report.dispatched.len(), 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].rule_id(), Some(2));
    assert!(matches!(report.errors[0], EngineError::RuleParse { .. }));
    assert_eq!(sender.sent().len(), 2);
}
