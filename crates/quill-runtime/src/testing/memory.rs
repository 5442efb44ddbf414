//! In-memory migration backend.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use quill_core::error::{QuillError, Result};
use quill_core::{Dialect, MigrationRecord};

use crate::migrations::{BackendFuture, LedgerChange, MigrationBackend};

/// A [`MigrationBackend`] that keeps its ledger in memory and records every
/// statement it executes instead of talking to a database.
///
/// Statements containing a configured fragment fail (or never complete),
/// which lets tests drive the migrator through error and cancellation paths.
pub struct MemoryBackend {
    dialect: Dialect,
    transactional_ddl: bool,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    ledger_created: bool,
    ledger: Vec<MigrationRecord>,
    executed: Vec<String>,
    fail_on: Vec<String>,
    hang_on: Vec<String>,
    locked: bool,
    lock_count: usize,
}

impl MemoryBackend {
    /// Backend for `dialect`, with transactional DDL where the dialect has it.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            transactional_ddl: dialect.supports_transactional_ddl(),
            state: Mutex::new(State::default()),
        }
    }

    /// Override whether atomic application is reported as available.
    pub fn with_transactional_ddl(mut self, enabled: bool) -> Self {
        self.transactional_ddl = enabled;
        self
    }

    /// Fail any statement containing `fragment`.
    pub fn fail_on(self, fragment: impl Into<String>) -> Self {
        self.state().fail_on.push(fragment.into());
        self
    }

    /// Never complete any statement containing `fragment`.
    pub fn hang_on(self, fragment: impl Into<String>) -> Self {
        self.state().hang_on.push(fragment.into());
        self
    }

    /// Seed the ledger directly, bypassing the migrator.
    pub fn with_records(self, records: impl IntoIterator<Item = MigrationRecord>) -> Self {
        {
            let mut state = self.state();
            state.ledger_created = true;
            state.ledger.extend(records);
            state.ledger.sort_by(|a, b| a.version.cmp(&b.version));
        }
        self
    }

    /// Start failing statements containing `fragment` from now on.
    pub fn add_failure(&self, fragment: impl Into<String>) {
        self.state().fail_on.push(fragment.into());
    }

    /// Remove all failure rules.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_on.clear();
        state.hang_on.clear();
    }

    /// Every statement that took effect, in execution order.
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Forget the execution log.
    pub fn clear_executed(&self) {
        self.state().executed.clear();
    }

    /// Current ledger rows, ascending by version.
    pub fn records(&self) -> Vec<MigrationRecord> {
        self.state().ledger.clone()
    }

    pub fn ledger_created(&self) -> bool {
        self.state().ledger_created
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// How many times the lock has been taken.
    pub fn lock_count(&self) -> usize {
        self.state().lock_count
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, sql: &str) -> Result<bool> {
        let state = self.state();
        if let Some(fragment) = state.fail_on.iter().find(|f| sql.contains(f.as_str())) {
            return Err(QuillError::Database(format!(
                "statement failed on '{}': {}",
                fragment, sql
            )));
        }
        Ok(state.hang_on.iter().any(|f| sql.contains(f.as_str())))
    }

    fn apply_change(state: &mut State, change: &LedgerChange) -> Result<()> {
        match change {
            LedgerChange::Insert(record) => {
                if state.ledger.iter().any(|r| r.version == record.version) {
                    return Err(QuillError::Database(format!(
                        "duplicate ledger version '{}'",
                        record.version
                    )));
                }
                state.ledger.push(record.clone());
                state.ledger.sort_by(|a, b| a.version.cmp(&b.version));
            }
            LedgerChange::Delete(version) => {
                state.ledger.retain(|r| &r.version != version);
            }
        }
        Ok(())
    }
}

impl MigrationBackend for MemoryBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn supports_transactional_ddl(&self) -> bool {
        self.transactional_ddl
    }

    fn exec<'a>(&'a self, sql: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if self.check(sql)? {
                std::future::pending::<()>().await;
            }
            self.state().executed.push(sql.to_string());
            Ok(())
        })
    }

    fn ensure_ledger(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.state().ledger_created = true;
            Ok(())
        })
    }

    fn ledger(&self) -> BackendFuture<'_, Vec<MigrationRecord>> {
        Box::pin(async move {
            let state = self.state();
            if !state.ledger_created {
                return Err(QuillError::Database(
                    "ledger table does not exist".to_string(),
                ));
            }
            Ok(state.ledger.clone())
        })
    }

    fn record<'a>(&'a self, change: &'a LedgerChange) -> BackendFuture<'a, ()> {
        Box::pin(async move { Self::apply_change(&mut self.state(), change) })
    }

    fn apply_atomic<'a>(
        &'a self,
        statements: &'a [String],
        change: &'a LedgerChange,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            for statement in statements {
                if self.check(statement)? {
                    std::future::pending::<()>().await;
                }
            }
            let mut state = self.state();
            Self::apply_change(&mut state, change)?;
            state.executed.extend(statements.iter().cloned());
            Ok(())
        })
    }

    fn lock(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state.locked = true;
            state.lock_count += 1;
            Ok(())
        })
    }

    fn unlock(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.state().locked = false;
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}
