//! SQL dialects and the DDL fragments that differ between them.
//!
//! Migration definitions render their SQL through these helpers instead of
//! carrying one hand-written copy of every statement per database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QuillError;

/// A relational database's SQL syntax variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
}

impl Dialect {
    /// Canonical driver name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    /// Port the server listens on unless told otherwise.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySql => 3306,
        }
    }

    /// Whether DDL can be rolled back as part of a transaction.
    ///
    /// MySQL commits implicitly around `CREATE`/`DROP`/`ALTER`.
    pub fn supports_transactional_ddl(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Detect the dialect from a connection URL's scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://")?.0;
        scheme.parse().ok()
    }

    /// `<col> SERIAL PRIMARY KEY` or `<col> INT AUTO_INCREMENT PRIMARY KEY`.
    pub fn auto_increment_primary_key(&self, column: &str) -> String {
        match self {
            Self::Postgres => format!("{column} SERIAL PRIMARY KEY"),
            Self::MySql => format!("{column} INT AUTO_INCREMENT PRIMARY KEY"),
        }
    }

    /// Non-null timestamp defaulting to now. MySQL also refreshes it on update.
    pub fn updated_at_column(&self, column: &str) -> String {
        match self {
            Self::Postgres => format!("{column} TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"),
            Self::MySql => format!(
                "{column} TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP"
            ),
        }
    }

    /// Timestamp column that may hold NULL.
    ///
    /// MySQL otherwise gives the first TIMESTAMP column an implicit default.
    pub fn nullable_timestamp(&self, column: &str) -> String {
        match self {
            Self::Postgres => format!("{column} TIMESTAMP"),
            Self::MySql => format!("{column} TIMESTAMP NULL"),
        }
    }

    /// Suffix appended after the closing parenthesis of `CREATE TABLE`.
    pub fn table_options(&self) -> &'static str {
        match self {
            Self::Postgres => "",
            Self::MySql => " ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        }
    }

    /// `CREATE TABLE IF NOT EXISTS <name> (<columns>)` plus table options.
    pub fn create_table(&self, name: &str, columns: &[String]) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {name} (\n    {}\n){}",
            columns.join(",\n    "),
            self.table_options()
        )
    }

    /// Index creation. MySQL has no `IF NOT EXISTS` for indexes.
    pub fn create_index(&self, name: &str, table: &str, columns: &[&str]) -> String {
        let columns = columns.join(", ");
        match self {
            Self::Postgres => format!("CREATE INDEX IF NOT EXISTS {name} ON {table}({columns})"),
            Self::MySql => format!("CREATE INDEX {name} ON {table}({columns})"),
        }
    }

    /// Drop a table if present, cascading to dependents on PostgreSQL.
    pub fn drop_table(&self, name: &str) -> String {
        match self {
            Self::Postgres => format!("DROP TABLE IF EXISTS {name} CASCADE"),
            Self::MySql => format!("DROP TABLE IF EXISTS {name}"),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = QuillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(QuillError::Config(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }
}
