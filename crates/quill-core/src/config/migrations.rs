use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{QuillError, Result};

/// How a migration's statements relate to database transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    /// Every statement executes on its own.
    #[default]
    None,
    /// A migration's statements and its ledger write share one transaction
    /// on dialects with transactional DDL.
    PerMigration,
}

/// Migration runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `*.up.sql` / `*.down.sql` files.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Ledger table name.
    #[serde(default = "default_table")]
    pub table: String,

    #[serde(default)]
    pub transaction: TransactionMode,

    /// Hold an advisory lock while mutating the schema.
    #[serde(default = "default_true")]
    pub lock: bool,

    /// Register the built-in users/posts/pages schema.
    #[serde(default = "default_true")]
    pub builtin: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            table: default_table(),
            transaction: TransactionMode::default(),
            lock: true,
            builtin: true,
        }
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_table() -> String {
    "quill_migrations".to_string()
}

fn default_true() -> bool {
    true
}

impl MigrationsConfig {
    /// The ledger table name is interpolated into SQL, so it must be a plain identifier.
    pub fn validate(&self) -> Result<()> {
        let valid = !self.table.is_empty()
            && self.table.len() <= 64
            && !self.table.starts_with(|c: char| c.is_ascii_digit())
            && self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(QuillError::Config(format!(
                "Invalid ledger table name: {:?}",
                self.table
            )));
        }
        Ok(())
    }
}
