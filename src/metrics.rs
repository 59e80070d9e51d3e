//! Process-wide counters for the monitor.
//!
//! Counters are plain relaxed atomics; they are read back through [`snapshot`] for the
//! `status` command and the shutdown summary of the pipeline.
use std::sync::atomic::{AtomicU64, Ordering};

static EVENTS_PROCESSED: AtomicU64 = AtomicU64::new(0);
static RULES_EVALUATED: AtomicU64 = AtomicU64::new(0);
static RULES_MATCHED: AtomicU64 = AtomicU64::new(0);
static RULE_PARSE_ERRORS: AtomicU64 = AtomicU64::new(0);
static ACTION_CONFIG_ERRORS: AtomicU64 = AtomicU64::new(0);
static NOTIFICATIONS_SENT: AtomicU64 = AtomicU64::new(0);
static SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
static ALERTS_RAISED: AtomicU64 = AtomicU64::new(0);

pub fn inc_events_processed() {
    EVENTS_PROCESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rules_evaluated() {
    RULES_EVALUATED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rules_matched() {
    RULES_MATCHED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_rule_parse_errors() {
    RULE_PARSE_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_action_config_errors() {
    ACTION_CONFIG_ERRORS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_notifications_sent() {
    NOTIFICATIONS_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failures() {
    SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_alerts_raised() {
    ALERTS_RAISED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub events_processed: u64,
    pub rules_evaluated: u64,
    pub rules_matched: u64,
    pub rule_parse_errors: u64,
    pub action_config_errors: u64,
    pub notifications_sent: u64,
    pub send_failures: u64,
    pub alerts_raised: u64,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "events={} rules_evaluated={} matched={} parse_errors={} action_errors={} sent={} send_failures={} alerts={}",
            self.events_processed,
            self.rules_evaluated,
            self.rules_matched,
            self.rule_parse_errors,
            self.action_config_errors,
            self.notifications_sent,
            self.send_failures,
            self.alerts_raised
        )
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        events_processed: EVENTS_PROCESSED.load(Ordering::Relaxed),
        rules_evaluated: RULES_EVALUATED.load(Ordering::Relaxed),
        rules_matched: RULES_MATCHED.load(Ordering::Relaxed),
        rule_parse_errors: RULE_PARSE_ERRORS.load(Ordering::Relaxed),
        action_config_errors: ACTION_CONFIG_ERRORS.load(Ordering::Relaxed),
        notifications_sent: NOTIFICATIONS_SENT.load(Ordering::Relaxed),
        send_failures: SEND_FAILURES.load(Ordering::Relaxed),
        alerts_raised: ALERTS_RAISED.load(Ordering::Relaxed),
    }
}
