use std::fmt;
use std::sync::Arc;

use quill_core::Dialect;

use super::sql::split_sql_statements;

/// Produces the statements of one direction of a migration for a dialect.
pub type SqlProcedure = Arc<dyn Fn(Dialect) -> Vec<String> + Send + Sync>;

/// A versioned, reversible schema change.
///
/// Definitions are plain descriptions: they render SQL for the dialect they
/// are asked about and hold no state of their own.
#[derive(Clone)]
pub struct MigrationDefinition {
    version: String,
    description: String,
    up: SqlProcedure,
    down: SqlProcedure,
}

impl MigrationDefinition {
    /// A definition whose up and down procedures produce no statements.
    pub fn new(version: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: description.into(),
            up: Arc::new(|_| Vec::new()),
            down: Arc::new(|_| Vec::new()),
        }
    }

    /// Set the forward procedure.
    pub fn up<F>(mut self, f: F) -> Self
    where
        F: Fn(Dialect) -> Vec<String> + Send + Sync + 'static,
    {
        self.up = Arc::new(f);
        self
    }

    /// Set the backward procedure.
    pub fn down<F>(mut self, f: F) -> Self
    where
        F: Fn(Dialect) -> Vec<String> + Send + Sync + 'static,
    {
        self.down = Arc::new(f);
        self
    }

    /// Forward SQL shared by every dialect, split into statements.
    pub fn up_sql(self, sql: impl Into<String>) -> Self {
        let statements = split_sql_statements(&sql.into());
        self.up(move |_| statements.clone())
    }

    /// Backward SQL shared by every dialect, split into statements.
    pub fn down_sql(self, sql: impl Into<String>) -> Self {
        let statements = split_sql_statements(&sql.into());
        self.down(move |_| statements.clone())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Statements to apply this migration on `dialect`.
    pub fn up_statements(&self, dialect: Dialect) -> Vec<String> {
        (self.up)(dialect)
    }

    /// Statements to revert this migration on `dialect`.
    pub fn down_statements(&self, dialect: Dialect) -> Vec<String> {
        (self.down)(dialect)
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
