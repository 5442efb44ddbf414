//! Migration orchestration: apply, rollback, status and reset.
//!
//! The ledger records every applied version together with the batch it was
//! applied in. One `migrate` call is one batch; `rollback` reverts the most
//! recent batch only.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quill_core::config::{MigrationsConfig, TransactionMode};
use quill_core::error::{Phase, QuillError, Result};
use quill_core::migration::max_batch;
use quill_core::{Clock, Dialect, MigrationRecord, MigrationStatus, SystemClock};

use super::backend::{LedgerChange, MigrationBackend};
use super::definition::MigrationDefinition;
use super::registry::MigrationRegistry;

/// Applies and reverts the migrations of a registry against one backend.
pub struct Migrator {
    registry: MigrationRegistry,
    backend: Arc<dyn MigrationBackend>,
    clock: Arc<dyn Clock>,
    transaction: TransactionMode,
    lock: bool,
}

impl Migrator {
    pub fn new(registry: MigrationRegistry, backend: Arc<dyn MigrationBackend>) -> Self {
        Self {
            registry,
            backend,
            clock: Arc::new(SystemClock),
            transaction: TransactionMode::default(),
            lock: true,
        }
    }

    /// Take transaction and locking behaviour from configuration.
    pub fn with_config(self, config: &MigrationsConfig) -> Self {
        self.with_transaction_mode(config.transaction)
            .with_lock(config.lock)
    }

    /// Use `clock` for `applied_at` timestamps.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction = mode;
        self
    }

    /// Hold the backend's migration lock during mutating operations.
    pub fn with_lock(mut self, enabled: bool) -> Self {
        self.lock = enabled;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    /// Apply every pending migration, ascending by version, as one new batch.
    ///
    /// Stops at the first failure. Migrations applied before it stay applied
    /// and recorded; the failing one is not recorded. Returns the versions
    /// applied by this call.
    pub async fn migrate(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let atomic = self.use_transactions();
        self.locked(cancel, self.migrate_inner(atomic, cancel)).await
    }

    /// Revert every migration of the most recent batch, descending by version.
    ///
    /// Fails with [`QuillError::NotFound`] when nothing is applied.
    pub async fn rollback(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let atomic = self.use_transactions();
        self.locked(cancel, self.rollback_inner(atomic, cancel)).await
    }

    /// Revert every applied migration, descending by version, regardless of batch.
    pub async fn reset(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let atomic = self.use_transactions();
        self.locked(cancel, self.reset_inner(atomic, cancel)).await
    }

    /// Reset, then migrate from an empty ledger. Returns the versions applied.
    pub async fn fresh(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let atomic = self.use_transactions();
        self.locked(cancel, async {
            self.reset_inner(atomic, cancel).await?;
            self.migrate_inner(atomic, cancel).await
        })
        .await
    }

    /// Applied/pending state of every registered migration, ascending by version.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<Vec<MigrationStatus>> {
        let applied = self.load_ledger(cancel).await?;

        Ok(self
            .registry
            .all()
            .map(|definition| status_for(definition, &applied))
            .collect())
    }

    /// Applied/pending state of one registered migration.
    pub async fn status_of(
        &self,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<MigrationStatus> {
        let definition = self
            .registry
            .get(version)
            .ok_or_else(|| QuillError::NotFound(format!("Migration {} is not registered", version)))?;
        let applied = self.load_ledger(cancel).await?;
        Ok(status_for(definition, &applied))
    }

    async fn migrate_inner(&self, atomic: bool, cancel: &CancellationToken) -> Result<Vec<String>> {
        let applied = self.load_ledger(cancel).await?;
        let applied_versions: HashSet<&str> = applied.iter().map(|r| r.version.as_str()).collect();

        let pending: Vec<&MigrationDefinition> = self
            .registry
            .all()
            .filter(|d| !applied_versions.contains(d.version()))
            .collect();

        if pending.is_empty() {
            info!("Nothing to migrate");
            return Ok(Vec::new());
        }

        let batch = max_batch(&applied) + 1;
        debug!(batch, pending = pending.len(), "Starting migration batch");

        let mut done = Vec::with_capacity(pending.len());
        for definition in pending {
            info!(
                version = definition.version(),
                batch, "Applying migration: {}", definition.description()
            );

            let statements = definition.up_statements(self.dialect());
            let change = LedgerChange::Insert(MigrationRecord {
                version: definition.version().to_string(),
                description: definition.description().to_string(),
                batch,
                applied_at: self.clock.now(),
            });
            self.run(definition.version(), Phase::Up, &statements, &change, atomic, cancel)
                .await?;

            info!(version = definition.version(), "Migration applied");
            done.push(definition.version().to_string());
        }

        Ok(done)
    }

    async fn rollback_inner(&self, atomic: bool, cancel: &CancellationToken) -> Result<Vec<String>> {
        let applied = self.load_ledger(cancel).await?;
        if applied.is_empty() {
            return Err(QuillError::NotFound("No migrations to rollback".to_string()));
        }

        let batch = max_batch(&applied);
        let mut targets: Vec<&MigrationRecord> =
            applied.iter().filter(|r| r.batch == batch).collect();
        targets.sort_by(|a, b| b.version.cmp(&a.version));

        debug!(batch, count = targets.len(), "Rolling back batch");
        self.revert_all(targets, atomic, cancel).await
    }

    async fn reset_inner(&self, atomic: bool, cancel: &CancellationToken) -> Result<Vec<String>> {
        let applied = self.load_ledger(cancel).await?;
        let mut targets: Vec<&MigrationRecord> = applied.iter().collect();
        targets.sort_by(|a, b| b.version.cmp(&a.version));

        debug!(count = targets.len(), "Resetting all migrations");
        self.revert_all(targets, atomic, cancel).await
    }

    async fn revert_all(
        &self,
        targets: Vec<&MigrationRecord>,
        atomic: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut done = Vec::with_capacity(targets.len());

        for record in targets {
            // load_ledger has already rejected rows without a definition.
            let definition = self.registry.get(&record.version).ok_or_else(|| {
                QuillError::LedgerCorruption {
                    versions: vec![record.version.clone()],
                }
            })?;
            info!(
                version = definition.version(),
                batch = record.batch,
                "Rolling back migration: {}",
                definition.description()
            );

            let statements = definition.down_statements(self.dialect());
            let change = LedgerChange::Delete(record.version.clone());
            self.run(definition.version(), Phase::Down, &statements, &change, atomic, cancel)
                .await?;

            info!(version = definition.version(), "Migration rolled back");
            done.push(record.version.clone());
        }

        Ok(done)
    }

    /// Execute one direction of a migration and write its ledger change.
    async fn run(
        &self,
        version: &str,
        phase: Phase,
        statements: &[String],
        change: &LedgerChange,
        atomic: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if atomic {
            return cancellable(cancel, self.backend.apply_atomic(statements, change))
                .await
                .map_err(|e| with_context(version, phase, e));
        }

        for statement in statements {
            cancellable(cancel, self.backend.exec(statement))
                .await
                .map_err(|e| with_context(version, phase, e))?;
        }
        cancellable(cancel, self.backend.record(change))
            .await
            .map_err(|e| with_context(version, phase, e))
    }

    /// Ensure the ledger exists, read it and reject rows with no definition.
    async fn load_ledger(&self, cancel: &CancellationToken) -> Result<Vec<MigrationRecord>> {
        cancellable(cancel, self.backend.ensure_ledger()).await?;
        let applied = cancellable(cancel, self.backend.ledger()).await?;
        debug!(
            "Already applied migrations: {:?}",
            applied.iter().map(|r| &r.version).collect::<Vec<_>>()
        );

        let orphans: Vec<String> = applied
            .iter()
            .filter(|r| !self.registry.contains(&r.version))
            .map(|r| r.version.clone())
            .collect();
        if !orphans.is_empty() {
            return Err(QuillError::LedgerCorruption { versions: orphans });
        }

        Ok(applied)
    }

    /// Whether each migration runs in its own transaction. Warns when
    /// per-migration transactions were asked for but cannot be honoured.
    fn use_transactions(&self) -> bool {
        match self.transaction {
            TransactionMode::None => false,
            TransactionMode::PerMigration if self.backend.supports_transactional_ddl() => true,
            TransactionMode::PerMigration => {
                warn!(
                    dialect = %self.dialect(),
                    "Dialect has no transactional DDL; migrations run statement by statement"
                );
                false
            }
        }
    }

    /// Run `op` while holding the backend's migration lock.
    async fn locked<T>(
        &self,
        cancel: &CancellationToken,
        op: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        if !self.lock {
            return op.await;
        }

        cancellable(cancel, self.backend.lock()).await?;
        let result = op.await;

        // Always release lock, even on error
        if let Err(e) = self.backend.unlock().await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }
}

fn status_for(definition: &MigrationDefinition, applied: &[MigrationRecord]) -> MigrationStatus {
    match applied.iter().find(|r| r.version == definition.version()) {
        Some(record) => MigrationStatus::applied(record),
        None => MigrationStatus::pending(definition.version(), definition.description()),
    }
}

fn with_context(version: &str, phase: Phase, err: QuillError) -> QuillError {
    match err {
        QuillError::Cancelled => QuillError::Cancelled,
        other => QuillError::execution(version, phase, other),
    }
}

/// Resolve to [`QuillError::Cancelled`] as soon as `cancel` fires, dropping `fut`.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QuillError::Cancelled),
        result = fut => result,
    }
}
