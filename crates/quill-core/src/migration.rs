use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the migration ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Version of the applied definition (e.g. "20260113000001").
    pub version: String,
    /// Human-readable label copied from the definition.
    pub description: String,
    /// Batch the migration was applied in. Starts at 1.
    pub batch: i64,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Applied/pending state of a registered migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub version: String,
    pub description: String,
    pub applied: bool,
    /// Batch number when applied.
    pub batch: Option<i64>,
    pub applied_at: Option<DateTime<Utc>>,
}

impl MigrationStatus {
    /// A registered migration with no ledger row.
    pub fn pending(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            applied: false,
            batch: None,
            applied_at: None,
        }
    }

    /// A registered migration backed by a ledger row.
    pub fn applied(record: &MigrationRecord) -> Self {
        Self {
            version: record.version.clone(),
            description: record.description.clone(),
            applied: true,
            batch: Some(record.batch),
            applied_at: Some(record.applied_at),
        }
    }
}

/// Highest batch number in the ledger, 0 when empty.
pub fn max_batch(records: &[MigrationRecord]) -> i64 {
    records.iter().map(|r| r.batch).max().unwrap_or(0)
}
