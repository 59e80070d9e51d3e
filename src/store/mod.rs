//! # Monitor Store
//!
//! Sled-backed persistence for everything the monitor keeps across restarts:
//!
//! ```text
//! <data_dir>/meshwatch/
//! ├── rules      ← rules:<id>              user-defined alert rules (JSON conditions/action)
//! ├── alerts     ← alerts:<id>             append-only alert log
//! │                node:<node_id>:<id>     per-node index for "latest alert" lookups
//! ├── nodes      ← nodes:<node_id>         first/last seen, alias, radio stats, position
//! ├── readings   ← readings:<node_id>:<id> derived telemetry readings
//! ├── links      ← links:<source>:<target> last heard SNR per radio link
//! └── messages   ← messages:<id>           text messages heard on the mesh
//! ```
//!
//! Records are serialized with bincode and carry a schema version. Ids come from
//! [`sled::Db::generate_id`] and are zero-padded in keys so prefix scans come back in
//! insertion order.
//!
//! The rule engine only sees the [`RuleStore`] trait; the rest of the API is used by
//! the pipeline, the heartbeat watch and the CLI.

mod errors;
mod types;

pub use errors::{StoreError, UnreadableRule};
pub use types::{
    AlertKind, AlertRecord, LinkRecord, MessageRecord, NodeRecord, ReadingRecord, Severity,
    StoredRule, ALERT_SCHEMA_VERSION, LINK_SCHEMA_VERSION, MESSAGE_SCHEMA_VERSION,
    NODE_SCHEMA_VERSION, READING_SCHEMA_VERSION, RULE_SCHEMA_VERSION,
};

use std::path::Path;

use chrono::{DateTime, Utc};
use sled::IVec;

use crate::packet::{LinkStats, TextMessage};
use crate::rules::{Action, Condition};
use crate::telemetry::TelemetryEvent;

const TREE_RULES: &str = "rules";
const TREE_ALERTS: &str = "alerts";
const TREE_NODES: &str = "nodes";
const TREE_READINGS: &str = "readings";
const TREE_LINKS: &str = "links";
const TREE_MESSAGES: &str = "messages";

/// One row of the rule listing. Undecodable rows come back as errors in place.
pub type RuleRow = Result<StoredRule, UnreadableRule>;

/// What the rule engine and battery monitor need from persistence.
pub trait RuleStore {
    /// All stored rules in retrieval (id) order. The outer error is reserved for the
    /// storage itself failing; a single bad row does not abort the listing.
    fn list_rules(&self) -> Result<Vec<RuleRow>, StoreError>;

    /// Most recent alert recorded for `node_id`, read or not.
    fn last_alert_for_node(&self, node_id: &str) -> Result<Option<AlertRecord>, StoreError>;

    fn insert_alert(
        &self,
        node_id: &str,
        message: &str,
        severity: Severity,
        kind: AlertKind,
        now: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError>;
}

impl<T: RuleStore + ?Sized> RuleStore for &T {
    fn list_rules(&self) -> Result<Vec<RuleRow>, StoreError> {
        (**self).list_rules()
    }

    fn last_alert_for_node(&self, node_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        (**self).last_alert_for_node(node_id)
    }

    fn insert_alert(
        &self,
        node_id: &str,
        message: &str,
        severity: Severity,
        kind: AlertKind,
        now: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        (**self).insert_alert(node_id, message, severity, kind, now)
    }
}

/// Sled-backed monitor persistence. Cheap to clone; clones share the same database.
#[derive(Clone)]
pub struct MonitorStore {
    db: sled::Db,
    rules: sled::Tree,
    alerts: sled::Tree,
    nodes: sled::Tree,
    readings: sled::Tree,
    links: sled::Tree,
    messages: sled::Tree,
}

impl MonitorStore {
    /// Open (or create) the store rooted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::open(path_ref)?;
        let rules = db.open_tree(TREE_RULES)?;
        let alerts = db.open_tree(TREE_ALERTS)?;
        let nodes = db.open_tree(TREE_NODES)?;
        let readings = db.open_tree(TREE_READINGS)?;
        let links = db.open_tree(TREE_LINKS)?;
        let messages = db.open_tree(TREE_MESSAGES)?;
        Ok(Self {
            db,
            rules,
            alerts,
            nodes,
            readings,
            links,
            messages,
        })
    }

    fn rule_key(id: u64) -> Vec<u8> {
        format!("rules:{:020}", id).into_bytes()
    }

    fn alert_key(id: u64) -> Vec<u8> {
        format!("alerts:{:020}", id).into_bytes()
    }

    fn alert_node_prefix(node_id: &str) -> Vec<u8> {
        format!("node:{}:", node_id).into_bytes()
    }

    fn node_key(node_id: &str) -> Vec<u8> {
        format!("nodes:{}", node_id).into_bytes()
    }

    fn readings_prefix(node_id: &str) -> Vec<u8> {
        format!("readings:{}:", node_id).into_bytes()
    }

    fn link_key(source: &str, target: &str) -> Vec<u8> {
        format!("links:{}:{}", source, target).into_bytes()
    }

    fn message_key(id: u64) -> Vec<u8> {
        format!("messages:{:020}", id).into_bytes()
    }

    /// Rule id encoded in a `rules:<id>` key, or 0 when the key is malformed.
    fn rule_id_from_key(key: &[u8]) -> u64 {
        std::str::from_utf8(key)
            .ok()
            .and_then(|k| k.strip_prefix("rules:"))
            .and_then(|id| id.parse().ok())
            .unwrap_or(0)
    }

    fn decode_rule(value: IVec) -> Result<StoredRule, StoreError> {
        let rule: StoredRule = Self::deserialize(value)?;
        Self::check_schema("rule", RULE_SCHEMA_VERSION, rule.schema_version)?;
        Ok(rule)
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(bytes: IVec) -> Result<T, StoreError> {
        Ok(bincode::deserialize::<T>(&bytes)?)
    }

    fn check_schema(entity: &'static str, expected: u8, found: u8) -> Result<(), StoreError> {
        if expected != found {
            return Err(StoreError::SchemaMismatch {
                entity,
                expected,
                found,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------ rules

    /// Store a new rule built from typed conditions and action.
    pub fn add_rule(
        &self,
        alias: &str,
        conditions: &[Condition],
        action: &Action,
    ) -> Result<StoredRule, StoreError> {
        let conditions_json = serde_json::to_string(conditions)?;
        let action_json = serde_json::to_string(action)?;
        self.put_raw_rule(alias, &conditions_json, &action_json)
    }

    /// Store a rule from its raw JSON encodings without validating them.
    pub fn put_raw_rule(
        &self,
        alias: &str,
        conditions_json: &str,
        action_json: &str,
    ) -> Result<StoredRule, StoreError> {
        let rule = StoredRule {
            id: self.db.generate_id()?,
            alias: alias.to_string(),
            conditions_json: conditions_json.to_string(),
            action_json: action_json.to_string(),
            created_at: Utc::now(),
            schema_version: RULE_SCHEMA_VERSION,
        };
        self.rules
            .insert(Self::rule_key(rule.id), Self::serialize(&rule)?)?;
        self.rules.flush()?;
        Ok(rule)
    }

    /// Replace an existing rule wholesale; rules are never edited field by field.
    pub fn replace_rule(&self, rule: &StoredRule) -> Result<(), StoreError> {
        let key = Self::rule_key(rule.id);
        if !self.rules.contains_key(&key)? {
            return Err(StoreError::NotFound(format!("rule: {}", rule.id)));
        }
        let mut record = rule.clone();
        record.schema_version = RULE_SCHEMA_VERSION;
        self.rules.insert(key, Self::serialize(&record)?)?;
        self.rules.flush()?;
        Ok(())
    }

    pub fn get_rule(&self, id: u64) -> Result<StoredRule, StoreError> {
        let Some(bytes) = self.rules.get(Self::rule_key(id))? else {
            return Err(StoreError::NotFound(format!("rule: {}", id)));
        };
        Self::decode_rule(bytes)
    }

    /// Delete a rule. Returns false when no rule had that id.
    pub fn delete_rule(&self, id: u64) -> Result<bool, StoreError> {
        let removed = self.rules.remove(Self::rule_key(id))?.is_some();
        self.rules.flush()?;
        Ok(removed)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    // ----------------------------------------------------------------- alerts

    /// Newest alerts first.
    pub fn list_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        self.alerts
            .scan_prefix(b"alerts:")
            .rev()
            .take(limit)
            .map(|entry| {
                entry
                    .map_err(StoreError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect()
    }

    pub fn unread_alert_count(&self) -> Result<usize, StoreError> {
        let mut unread = 0usize;
        for entry in self.alerts.scan_prefix(b"alerts:") {
            let (_key, value) = entry?;
            let alert: AlertRecord = Self::deserialize(value)?;
            if !alert.read {
                unread += 1;
            }
        }
        Ok(unread)
    }

    /// Flag every unread alert as read. Returns how many changed.
    pub fn mark_alerts_read(&self) -> Result<usize, StoreError> {
        let mut changed = 0usize;
        for entry in self.alerts.scan_prefix(b"alerts:") {
            let (key, value) = entry?;
            let mut alert: AlertRecord = Self::deserialize(value)?;
            if alert.read {
                continue;
            }
            alert.read = true;
            self.alerts.insert(key, Self::serialize(&alert)?)?;
            changed += 1;
        }
        self.alerts.flush()?;
        Ok(changed)
    }

    // ------------------------------------------------------------------ nodes

    /// Register a node on first contact and bump `last_seen` afterwards.
    ///
    /// `default_alias` is only used when the node is new; an alias already on record
    /// is kept.
    pub fn touch_node(
        &self,
        node_id: &str,
        default_alias: &str,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, StoreError> {
        self.update_node_stats(node_id, default_alias, None, &LinkStats::default(), now)
    }

    /// Like [`touch_node`](Self::touch_node), also recording the battery level and
    /// envelope stats of the packet. Absent values keep what is on record.
    pub fn update_node_stats(
        &self,
        node_id: &str,
        default_alias: &str,
        battery: Option<f64>,
        link: &LinkStats,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, StoreError> {
        self.modify_node(node_id, default_alias, now, |record| {
            record.last_seen = now;
            record.battery = battery.or(record.battery);
            record.snr = link.snr.or(record.snr);
            record.rssi = link.rssi.or(record.rssi);
            record.hops = link.hop_limit.or(record.hops);
        })
    }

    pub fn update_node_position(
        &self,
        node_id: &str,
        default_alias: &str,
        latitude: f64,
        longitude: f64,
        now: DateTime<Utc>,
    ) -> Result<NodeRecord, StoreError> {
        self.modify_node(node_id, default_alias, now, |record| {
            record.last_seen = now;
            record.latitude = Some(latitude);
            record.longitude = Some(longitude);
        })
    }

    fn modify_node<F>(
        &self,
        node_id: &str,
        default_alias: &str,
        now: DateTime<Utc>,
        apply: F,
    ) -> Result<NodeRecord, StoreError>
    where
        F: FnOnce(&mut NodeRecord),
    {
        let key = Self::node_key(node_id);
        let mut record = match self.nodes.get(&key)? {
            Some(bytes) => {
                let record: NodeRecord = Self::deserialize(bytes)?;
                Self::check_schema("node", NODE_SCHEMA_VERSION, record.schema_version)?;
                record
            }
            None => NodeRecord::new(node_id, default_alias, now),
        };
        apply(&mut record);
        self.nodes.insert(key, Self::serialize(&record)?)?;
        self.nodes.flush()?;
        Ok(record)
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, StoreError> {
        match self.nodes.get(Self::node_key(node_id))? {
            Some(bytes) => Ok(Some(Self::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn update_node_alias(&self, node_id: &str, alias: &str) -> Result<(), StoreError> {
        let Some(mut record) = self.get_node(node_id)? else {
            return Err(StoreError::NotFound(format!("node: {}", node_id)));
        };
        record.alias = alias.to_string();
        self.nodes
            .insert(Self::node_key(node_id), Self::serialize(&record)?)?;
        self.nodes.flush()?;
        Ok(())
    }

    pub fn list_nodes(&self) -> Result<Vec<NodeRecord>, StoreError> {
        self.nodes
            .scan_prefix(b"nodes:")
            .map(|entry| {
                entry
                    .map_err(StoreError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect()
    }

    // ------------------------------------------------------- links & messages

    /// Record that `source` was heard by `target` at `snr`. Only the latest sample is kept.
    pub fn update_link(
        &self,
        source: &str,
        target: &str,
        snr: f64,
        now: DateTime<Utc>,
    ) -> Result<LinkRecord, StoreError> {
        let record = LinkRecord {
            source: source.to_string(),
            target: target.to_string(),
            last_snr: snr,
            last_seen: now,
            schema_version: LINK_SCHEMA_VERSION,
        };
        self.links
            .insert(Self::link_key(source, target), Self::serialize(&record)?)?;
        self.links.flush()?;
        Ok(record)
    }

    pub fn list_links(&self) -> Result<Vec<LinkRecord>, StoreError> {
        self.links
            .scan_prefix(b"links:")
            .map(|entry| {
                entry
                    .map_err(StoreError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect()
    }

    pub fn save_message(
        &self,
        from: &str,
        message: &TextMessage,
        now: DateTime<Utc>,
    ) -> Result<MessageRecord, StoreError> {
        let record = MessageRecord {
            id: self.db.generate_id()?,
            from: from.to_string(),
            to: message.to.clone(),
            channel: message.channel,
            text: message.text.clone(),
            direct: message.direct,
            timestamp: now,
            schema_version: MESSAGE_SCHEMA_VERSION,
        };
        self.messages
            .insert(Self::message_key(record.id), Self::serialize(&record)?)?;
        self.messages.flush()?;
        Ok(record)
    }

    /// Newest messages first.
    pub fn list_messages(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        self.messages
            .scan_prefix(b"messages:")
            .rev()
            .take(limit)
            .map(|entry| {
                entry
                    .map_err(StoreError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect()
    }

    // --------------------------------------------------------------- readings

    /// Persist the non-null readings of `event`. Events without any reading are skipped
    /// and return `None`.
    pub fn record_reading(
        &self,
        event: &TelemetryEvent,
        now: DateTime<Utc>,
    ) -> Result<Option<ReadingRecord>, StoreError> {
        let values = event.readings();
        if values.is_empty() {
            return Ok(None);
        }
        let record = ReadingRecord {
            id: self.db.generate_id()?,
            node_id: event.node_id.clone(),
            timestamp: now,
            values,
            schema_version: READING_SCHEMA_VERSION,
        };
        let mut key = Self::readings_prefix(&event.node_id);
        key.extend_from_slice(format!("{:020}", record.id).as_bytes());
        self.readings.insert(key, Self::serialize(&record)?)?;
        self.readings.flush()?;
        Ok(Some(record))
    }

    /// Up to `limit` most recent readings for a node, oldest first.
    pub fn readings_for_node(
        &self,
        node_id: &str,
        limit: usize,
    ) -> Result<Vec<ReadingRecord>, StoreError> {
        let mut out: Vec<ReadingRecord> = self
            .readings
            .scan_prefix(Self::readings_prefix(node_id))
            .rev()
            .take(limit)
            .map(|entry| {
                entry
                    .map_err(StoreError::from)
                    .and_then(|(_key, value)| Self::deserialize(value))
            })
            .collect::<Result<_, _>>()?;
        out.reverse();
        Ok(out)
    }
}

impl RuleStore for MonitorStore {
    fn list_rules(&self) -> Result<Vec<RuleRow>, StoreError> {
        let mut rules = Vec::with_capacity(self.rules.len());
        for entry in self.rules.scan_prefix(b"rules:") {
            let (key, value) = entry?;
            let row = Self::decode_rule(value).map_err(|source| UnreadableRule {
                rule_id: Self::rule_id_from_key(&key),
                source,
            });
            rules.push(row);
        }
        Ok(rules)
    }

    fn last_alert_for_node(&self, node_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        let Some(entry) = self
            .alerts
            .scan_prefix(Self::alert_node_prefix(node_id))
            .next_back()
        else {
            return Ok(None);
        };
        let (_index_key, alert_key) = entry?;
        match self.alerts.get(alert_key)? {
            Some(bytes) => Ok(Some(Self::deserialize(bytes)?)),
            None => Ok(None),
        }
    }

    fn insert_alert(
        &self,
        node_id: &str,
        message: &str,
        severity: Severity,
        kind: AlertKind,
        now: DateTime<Utc>,
    ) -> Result<AlertRecord, StoreError> {
        let alert = AlertRecord {
            id: self.db.generate_id()?,
            timestamp: now,
            node_id: node_id.to_string(),
            message: message.to_string(),
            severity,
            kind,
            read: false,
            schema_version: ALERT_SCHEMA_VERSION,
        };
        let key = Self::alert_key(alert.id);
        let mut index_key = Self::alert_node_prefix(node_id);
        index_key.extend_from_slice(format!("{:020}", alert.id).as_bytes());
        self.alerts.insert(key.clone(), Self::serialize(&alert)?)?;
        self.alerts.insert(index_key, key)?;
        self.alerts.flush()?;
        Ok(alert)
    }
}
