//! PostgreSQL backend.
//!
//! The migration lock is a session-level advisory lock, so it is taken and
//! released on one dedicated pooled connection. While the lock is held every
//! statement runs on that connection, so a single-connection pool works.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Acquire, Executor, PgPool, Postgres};
use tokio::sync::Mutex;
use tracing::debug;

use quill_core::config::DatabaseConfig;
use quill_core::error::{QuillError, Result};
use quill_core::{Dialect, MigrationRecord};

use super::backend::{ledger_ddl, BackendFuture, LedgerChange, MigrationBackend};
use crate::db::Database;

/// Lock ID for the migration advisory lock ("QUILL" in hex).
const MIGRATION_LOCK_ID: i64 = 0x5155494C4C;

pub struct PostgresBackend {
    pool: PgPool,
    table: String,
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresBackend {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            lock_conn: Mutex::new(None),
        }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &DatabaseConfig, table: impl Into<String>) -> Result<Self> {
        match Database::from_config(config).await? {
            Database::Postgres(pool) => Ok(Self::new(pool, table)),
            other => Err(QuillError::Config(format!(
                "Expected a postgres connection, got {}",
                other.dialect()
            ))),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn write_change<'c, E>(table: &str, change: &LedgerChange, executor: E) -> Result<()>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    match change {
        LedgerChange::Insert(record) => {
            sqlx::query(&format!(
                "INSERT INTO {} (version, description, batch, applied_at) VALUES ($1, $2, $3, $4)",
                table
            ))
            .bind(&record.version)
            .bind(&record.description)
            .bind(record.batch)
            .bind(record.applied_at)
            .execute(executor)
            .await
            .map_err(|e| {
                QuillError::Database(format!(
                    "Failed to record migration '{}': {}",
                    record.version, e
                ))
            })?;
        }
        LedgerChange::Delete(version) => {
            sqlx::query(&format!("DELETE FROM {} WHERE version = $1", table))
                .bind(version)
                .execute(executor)
                .await
                .map_err(|e| {
                    QuillError::Database(format!(
                        "Failed to remove migration record '{}': {}",
                        version, e
                    ))
                })?;
        }
    }
    Ok(())
}

impl MigrationBackend for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn exec<'a>(&'a self, sql: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            debug!(sql, "Executing statement");
            let mut held = self.lock_conn.lock().await;
            match held.as_deref_mut() {
                Some(conn) => conn.execute(sql).await?,
                None => self.pool.execute(sql).await?,
            };
            Ok(())
        })
    }

    fn ensure_ledger(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let ddl = ledger_ddl(Dialect::Postgres, &self.table);
            let mut held = self.lock_conn.lock().await;
            match held.as_deref_mut() {
                Some(conn) => conn.execute(ddl.as_str()).await,
                None => self.pool.execute(ddl.as_str()).await,
            }
            .map_err(|e| {
                QuillError::Database(format!("Failed to create migrations table: {}", e))
            })?;
            Ok(())
        })
    }

    fn ledger(&self) -> BackendFuture<'_, Vec<MigrationRecord>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT version, description, batch, applied_at FROM {} ORDER BY version ASC",
                self.table
            );
            let query = sqlx::query_as::<_, (String, String, i64, DateTime<Utc>)>(&sql);
            let mut held = self.lock_conn.lock().await;
            let rows = match held.as_deref_mut() {
                Some(conn) => query.fetch_all(conn).await,
                None => query.fetch_all(&self.pool).await,
            }
            .map_err(|e| {
                QuillError::Database(format!("Failed to get applied migrations: {}", e))
            })?;

            Ok(rows
                .into_iter()
                .map(|(version, description, batch, applied_at)| MigrationRecord {
                    version,
                    description,
                    batch,
                    applied_at,
                })
                .collect())
        })
    }

    fn record<'a>(&'a self, change: &'a LedgerChange) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut held = self.lock_conn.lock().await;
            match held.as_deref_mut() {
                Some(conn) => write_change(&self.table, change, conn).await,
                None => write_change(&self.table, change, &self.pool).await,
            }
        })
    }

    fn apply_atomic<'a>(
        &'a self,
        statements: &'a [String],
        change: &'a LedgerChange,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut held = self.lock_conn.lock().await;
            let mut tx = match held.as_deref_mut() {
                Some(conn) => conn.begin().await?,
                None => self.pool.begin().await?,
            };
            for statement in statements {
                debug!(sql = %statement, "Executing statement in transaction");
                Executor::execute(&mut *tx, statement.as_str()).await?;
            }
            write_change(&self.table, change, &mut *tx).await?;
            tx.commit().await?;
            Ok(())
        })
    }

    fn lock(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let mut held = self.lock_conn.lock().await;
            if held.is_some() {
                return Ok(());
            }

            debug!("Acquiring migration lock...");
            let mut conn = self.pool.acquire().await?;
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(MIGRATION_LOCK_ID)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    QuillError::Database(format!("Failed to acquire migration lock: {}", e))
                })?;
            *held = Some(conn);
            debug!("Migration lock acquired");
            Ok(())
        })
    }

    fn unlock(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let Some(mut conn) = self.lock_conn.lock().await.take() else {
                return Ok(());
            };
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(MIGRATION_LOCK_ID)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    QuillError::Database(format!("Failed to release migration lock: {}", e))
                })?;
            debug!("Migration lock released");
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // Return the lock connection before the pool waits on it.
            self.lock_conn.lock().await.take();
            self.pool.close().await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use quill_core::config::TransactionMode;
    use sqlx::postgres::PgPoolOptions;
    use tokio_util::sync::CancellationToken;

    use crate::migrations::{MigrationDefinition, MigrationRegistry, Migrator};

    #[tokio::test]
    async fn test_backend_reports_postgres() {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/nonexistent")
            .expect("lazy pool");
        let backend = PostgresBackend::new(pool, "quill_migrations");
        assert_eq!(backend.dialect(), Dialect::Postgres);
        assert!(backend.supports_transactional_ddl());
    }

    #[test]
    fn test_lock_id_spells_quill() {
        assert_eq!(&MIGRATION_LOCK_ID.to_be_bytes()[3..], b"QUILL");
    }

    /// Single-connection config from TEST_DATABASE_URL. Tests that need a
    /// server return early when it is unset.
    fn test_config() -> Option<DatabaseConfig> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let mut config = DatabaseConfig::from_url(url);
        config.max_connections = 1;
        config.min_connections = 0;
        config.acquire_timeout_secs = 5;
        Some(config)
    }

    fn table_name(name: &str) -> String {
        format!("quill_test_{}_{}", name, std::process::id())
    }

    async fn table_exists(backend: &PostgresBackend, table: &str) -> bool {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(backend.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_migrate_status_rollback_on_single_connection() {
        let Some(config) = test_config() else {
            return;
        };
        let ledger = table_name("cycle_ledger");
        let widgets = table_name("widgets");
        let backend = Arc::new(PostgresBackend::connect(&config, &ledger).await.unwrap());
        let registry = MigrationRegistry::new()
            .with(
                MigrationDefinition::new("20260101000001", "create widgets")
                    .up_sql(format!("CREATE TABLE {widgets} (id BIGSERIAL PRIMARY KEY)"))
                    .down_sql(format!("DROP TABLE {widgets}")),
            )
            .unwrap();
        let migrator = Migrator::new(registry, backend.clone());
        let cancel = CancellationToken::new();

        assert_eq!(migrator.migrate(&cancel).await.unwrap(), vec!["20260101000001"]);
        assert!(table_exists(&backend, &widgets).await);

        // A second locked run only succeeds if the first released the lock.
        assert!(migrator.migrate(&cancel).await.unwrap().is_empty());

        let status = migrator.status(&cancel).await.unwrap();
        assert!(status[0].applied);
        assert_eq!(status[0].batch, Some(1));
        assert!(status[0].applied_at.is_some());

        assert_eq!(migrator.rollback(&cancel).await.unwrap(), vec!["20260101000001"]);
        assert!(backend.ledger().await.unwrap().is_empty());
        assert!(!table_exists(&backend, &widgets).await);

        backend.exec(&format!("DROP TABLE {ledger}")).await.unwrap();
        backend.close().await;
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back_its_statements() {
        let Some(config) = test_config() else {
            return;
        };
        let ledger = table_name("atomic_ledger");
        let kept = table_name("kept");
        let partial = table_name("partial");
        let backend = Arc::new(PostgresBackend::connect(&config, &ledger).await.unwrap());
        let registry = MigrationRegistry::new()
            .with(
                MigrationDefinition::new("20260101000001", "create kept")
                    .up_sql(format!("CREATE TABLE {kept} (id INT)")),
            )
            .unwrap()
            .with(
                MigrationDefinition::new("20260101000002", "half broken").up_sql(format!(
                    "CREATE TABLE {partial} (id INT); INSERT INTO {partial}_missing VALUES (1)"
                )),
            )
            .unwrap();
        let migrator = Migrator::new(registry, backend.clone())
            .with_transaction_mode(TransactionMode::PerMigration);

        assert!(migrator.migrate(&CancellationToken::new()).await.is_err());

        assert!(table_exists(&backend, &kept).await);
        assert!(!table_exists(&backend, &partial).await);
        let recorded: Vec<String> = backend
            .ledger()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(recorded, vec!["20260101000001"]);

        backend.exec(&format!("DROP TABLE {kept}")).await.unwrap();
        backend.exec(&format!("DROP TABLE {ledger}")).await.unwrap();
        backend.close().await;
    }
}
