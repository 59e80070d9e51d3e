use thiserror::Error;

use crate::channel::SendError;
use crate::store::StoreError;

/// Recoverable failures of one rule pass. None of these stop the monitor; at worst a
/// single rule, a single dispatch or a single step of one event is skipped.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A stored rule's condition or action encoding could not be decoded.
    #[error("rule {rule_id}: cannot parse stored rule: {reason}")]
    RuleParse { rule_id: u64, reason: String },

    /// A matched action is missing required parameters or has a bad template.
    #[error("rule {rule_id}: action misconfigured: {reason}")]
    ActionConfig { rule_id: u64, reason: String },

    /// The channel sender refused the notification. Not retried here.
    #[error("rule {rule_id}: send to channel '{channel}' failed: {source}")]
    SendFailure {
        rule_id: u64,
        channel: String,
        #[source]
        source: SendError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn rule_id(&self) -> Option<u64> {
        match self {
            EngineError::RuleParse { rule_id, .. }
            | EngineError::ActionConfig { rule_id, .. }
            | EngineError::SendFailure { rule_id, .. } => Some(*rule_id),
            EngineError::Store(_) => None,
        }
    }
}
