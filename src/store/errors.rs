use thiserror::Error;

/// Errors that can arise while interacting with the monitor store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Rule condition/action encoding could not be produced.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when fetching a record that is not present.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },
}

/// A stored rule row that could not be decoded. Reported per row so that one bad
/// record never hides the rest of the rule set.
#[derive(Debug, Error)]
#[error("rule {rule_id} is unreadable: {source}")]
pub struct UnreadableRule {
    pub rule_id: u64,
    #[source]
    pub source: StoreError,
}
