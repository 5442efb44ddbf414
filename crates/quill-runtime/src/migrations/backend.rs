use std::future::Future;
use std::pin::Pin;

use quill_core::error::Result;
use quill_core::{Dialect, MigrationRecord};

/// Boxed future returned by [`MigrationBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A single write to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerChange {
    /// Record a migration as applied.
    Insert(MigrationRecord),
    /// Forget an applied migration by version.
    Delete(String),
}

/// Statement execution and ledger storage for one database.
///
/// The migrator is the only caller. Implementations execute SQL exactly as
/// given and never retry.
pub trait MigrationBackend: Send + Sync {
    /// Dialect the backend speaks.
    fn dialect(&self) -> Dialect;

    /// Whether [`apply_atomic`](Self::apply_atomic) can roll back DDL.
    fn supports_transactional_ddl(&self) -> bool {
        self.dialect().supports_transactional_ddl()
    }

    /// Execute one statement outside of any explicit transaction.
    fn exec<'a>(&'a self, sql: &'a str) -> BackendFuture<'a, ()>;

    /// Create the ledger table if it does not exist.
    fn ensure_ledger(&self) -> BackendFuture<'_, ()>;

    /// Every ledger row, ascending by version.
    fn ledger(&self) -> BackendFuture<'_, Vec<MigrationRecord>>;

    /// Apply one ledger write on its own.
    fn record<'a>(&'a self, change: &'a LedgerChange) -> BackendFuture<'a, ()>;

    /// Execute `statements` and then `change` in a single transaction.
    fn apply_atomic<'a>(
        &'a self,
        statements: &'a [String],
        change: &'a LedgerChange,
    ) -> BackendFuture<'a, ()>;

    /// Take the cross-process migration lock, waiting until it is free.
    fn lock(&self) -> BackendFuture<'_, ()>;

    /// Release the lock taken by [`lock`](Self::lock). A no-op when not held.
    fn unlock(&self) -> BackendFuture<'_, ()>;

    /// Close all connections.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// `CREATE TABLE IF NOT EXISTS` for the ledger on `dialect`.
pub(crate) fn ledger_ddl(dialect: Dialect, table: &str) -> String {
    let applied_at = match dialect {
        Dialect::Postgres => "applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
        Dialect::MySql => "applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP",
    };
    dialect.create_table(
        table,
        &[
            dialect.auto_increment_primary_key("id"),
            "version VARCHAR(255) NOT NULL UNIQUE".to_string(),
            "description VARCHAR(255) NOT NULL DEFAULT ''".to_string(),
            "batch BIGINT NOT NULL".to_string(),
            applied_at.to_string(),
        ],
    )
}
