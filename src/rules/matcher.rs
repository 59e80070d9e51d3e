//! Lazy evaluation of stored rules against one event.

use super::errors::EngineError;
use super::Rule;
use crate::metrics;
use crate::store::RuleRow;
use crate::telemetry::TelemetryEvent;

/// Iterator over the rules that match an event, in store order.
///
/// Yields `Ok(rule)` for every rule whose conditions all hold and
/// `Err(EngineError::RuleParse)` for rows that cannot be decoded, whether the store
/// could not read the record or its conditions and action do not parse. Rules that
/// simply do not match are skipped. Each stored rule is looked at exactly once, so a
/// rule can fire at most once per event.
pub struct RuleMatches<'a> {
    event: &'a TelemetryEvent,
    rules: std::slice::Iter<'a, RuleRow>,
}

impl<'a> RuleMatches<'a> {
    pub fn new(event: &'a TelemetryEvent, rules: &'a [RuleRow]) -> Self {
        Self {
            event,
            rules: rules.iter(),
        }
    }
}

impl Iterator for RuleMatches<'_> {
    type Item = Result<Rule, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        for row in self.rules.by_ref() {
            metrics::inc_rules_evaluated();
            let parsed = match row {
                Ok(stored) => Rule::try_from(stored),
                Err(unreadable) => Err(EngineError::RuleParse {
                    rule_id: unreadable.rule_id,
                    reason: unreadable.source.to_string(),
                }),
            };
            let rule = match parsed {
                Ok(rule) => rule,
                Err(e) => {
                    metrics::inc_rule_parse_errors();
                    return Some(Err(e));
                }
            };
            if rule.matches(self.event) {
                metrics::inc_rules_matched();
                return Some(Ok(rule));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, Condition, Operator};
    use crate::store::{StoreError, StoredRule, UnreadableRule};
    use crate::telemetry::metric;
    use chrono::Utc;

    fn stored(id: u64, conditions: &[Condition]) -> RuleRow {
        Ok(raw(id, conditions))
    }

    fn raw(id: u64, conditions: &[Condition]) -> StoredRule {
        StoredRule {
            id,
            alias: format!("rule-{id}"),
            conditions_json: serde_json::to_string(conditions).unwrap(),
            action_json: serde_json::to_string(&Action::notify("alerts", "x")).unwrap(),
            created_at: Utc::now(),
            schema_version: 1,
        }
    }

    #[test]
    fn yields_only_matching_rules_in_order() {
        let rules = vec![
            stored(1, &[Condition::new(metric::TEMPERATURE, Operator::Greater, 30.0)]),
            stored(2, &[Condition::new(metric::TEMPERATURE, Operator::Less, 30.0)]),
            stored(
                3,
                &[
                    Condition::new(metric::TEMPERATURE, Operator::Greater, 20.0),
                    Condition::new(metric::HUMIDITY, Operator::Greater, 50.0),
                ],
            ),
            stored(4, &[]),
        ];
        let event = TelemetryEvent::new("!n")
            .with_metric(metric::TEMPERATURE, 35.0)
            .with_metric(metric::HUMIDITY, 60.0);
        let ids: Vec<u64> = RuleMatches::new(&event, &rules)
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn second_condition_failing_rejects_rule() {
        let rules = vec![stored(
            1,
            &[
                Condition::new(metric::TEMPERATURE, Operator::Greater, 20.0),
                Condition::new(metric::BATTERY, Operator::Less, 10.0),
            ],
        )];
        let event = TelemetryEvent::new("!n").with_metric(metric::TEMPERATURE, 35.0);
        assert_eq!(RuleMatches::new(&event, &rules).count(), 0);
    }

    #[test]
    fn malformed_rule_does_not_stop_iteration() {
        let mut broken = raw(2, &[]);
        broken.conditions_json = r#"[{"metric":"temperature","operator":">","value":"warm"}]"#.into();
        let rules = vec![
            stored(1, &[Condition::new(metric::TEMPERATURE, Operator::Greater, 30.0)]),
            Ok(broken),
            stored(3, &[Condition::new(metric::TEMPERATURE, Operator::NotEqual, 0.0)]),
        ];
        let event = TelemetryEvent::new("!n").with_metric(metric::TEMPERATURE, 35.0);
        let results: Vec<_> = RuleMatches::new(&event, &rules).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().id, 1);
        assert!(matches!(results[1], Err(EngineError::RuleParse { rule_id: 2, .. })));
        assert_eq!(results[2].as_ref().unwrap().id, 3);
    }

    #[test]
    fn unreadable_row_is_reported_in_place() {
        let rules = vec![
            stored(1, &[]),
            Err(UnreadableRule {
                rule_id: 2,
                source: StoreError::SchemaMismatch {
                    entity: "rule",
                    expected: 1,
                    found: 2,
                },
            }),
            stored(3, &[]),
        ];
        let event = TelemetryEvent::new("!n");
        let results: Vec<_> = RuleMatches::new(&event, &rules).collect();
        assert_eq!(results.len(), 3);
        match &results[1] {
            Err(EngineError::RuleParse { rule_id, reason }) => {
                assert_eq!(*rule_id, 2);
                assert!(reason.contains("schema mismatch"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(results[2].as_ref().unwrap().id, 3);
    }
}
