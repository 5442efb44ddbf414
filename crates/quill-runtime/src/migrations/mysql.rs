//! MySQL backend.
//!
//! MySQL commits implicitly around DDL, so [`apply_atomic`] only protects
//! the ledger write; the migrator does not use it for this dialect.
//!
//! The named lock belongs to the session that took it. While it is held
//! every statement runs on that session's connection.
//!
//! [`apply_atomic`]: MigrationBackend::apply_atomic

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Acquire, Executor, MySql, MySqlPool};
use tokio::sync::Mutex;
use tracing::debug;

use quill_core::config::DatabaseConfig;
use quill_core::error::{QuillError, Result};
use quill_core::{Dialect, MigrationRecord};

use super::backend::{ledger_ddl, BackendFuture, LedgerChange, MigrationBackend};
use crate::db::Database;

pub struct MySqlBackend {
    pool: MySqlPool,
    table: String,
    lock_conn: Mutex<Option<PoolConnection<MySql>>>,
}

impl MySqlBackend {
    pub fn new(pool: MySqlPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            lock_conn: Mutex::new(None),
        }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &DatabaseConfig, table: impl Into<String>) -> Result<Self> {
        match Database::from_config(config).await? {
            Database::MySql(pool) => Ok(Self::new(pool, table)),
            other => Err(QuillError::Config(format!(
                "Expected a mysql connection, got {}",
                other.dialect()
            ))),
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Named lock shared by every process migrating this ledger.
    fn lock_name(&self) -> String {
        format!("{}_lock", self.table)
    }
}

async fn write_change<'c, E>(table: &str, change: &LedgerChange, executor: E) -> Result<()>
where
    E: sqlx::Executor<'c, Database = MySql>,
{
    match change {
        LedgerChange::Insert(record) => {
            sqlx::query(&format!(
                "INSERT INTO {} (version, description, batch, applied_at) VALUES (?, ?, ?, ?)",
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
            sqlx::query(&format!("DELETE FROM {} WHERE version = ?", table))
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

impl MigrationBackend for MySqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
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
            let ddl = ledger_ddl(Dialect::MySql, &self.table);
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
            // A negative timeout waits indefinitely.
            let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, -1)")
                .bind(self.lock_name())
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| {
                    QuillError::Database(format!("Failed to acquire migration lock: {}", e))
                })?;
            if acquired != Some(1) {
                return Err(QuillError::Database(
                    "Failed to acquire migration lock: GET_LOCK did not succeed".to_string(),
                ));
            }
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
            sqlx::query("SELECT RELEASE_LOCK(?)")
                .bind(self.lock_name())
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
    use sqlx::mysql::MySqlPoolOptions;
    use tokio_util::sync::CancellationToken;

    use crate::migrations::{MigrationDefinition, MigrationRegistry, Migrator};

    #[tokio::test]
    async fn test_backend_reports_mysql() {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect_lazy("mysql://root@localhost/nonexistent")
            .expect("lazy pool");
        let backend = MySqlBackend::new(pool, "quill_migrations");
        assert_eq!(backend.dialect(), Dialect::MySql);
        assert!(!backend.supports_transactional_ddl());
        assert_eq!(backend.lock_name(), "quill_migrations_lock");
    }

    /// Single-connection config from TEST_MYSQL_URL. Tests that need a
    /// server return early when it is unset.
    fn test_config() -> Option<DatabaseConfig> {
        let url = std::env::var("TEST_MYSQL_URL").ok()?;
        let mut config = DatabaseConfig::from_url(url);
        config.max_connections = 1;
        config.min_connections = 0;
        config.acquire_timeout_secs = 5;
        Some(config)
    }

    fn table_name(name: &str) -> String {
        format!("quill_test_{}_{}", name, std::process::id())
    }

    async fn table_exists(backend: &MySqlBackend, table: &str) -> bool {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_one(backend.pool())
        .await
        .unwrap();
        count > 0
    }

    #[tokio::test]
    async fn test_migrate_status_rollback_on_single_connection() {
        let Some(config) = test_config() else {
            return;
        };
        let ledger = table_name("cycle_ledger");
        let widgets = table_name("widgets");
        let backend = Arc::new(MySqlBackend::connect(&config, &ledger).await.unwrap());
        let registry = MigrationRegistry::new()
            .with(
                MigrationDefinition::new("20260101000001", "create widgets")
                    .up_sql(format!(
                        "CREATE TABLE {widgets} (id BIGINT AUTO_INCREMENT PRIMARY KEY)"
                    ))
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
    async fn test_per_migration_mode_keeps_implicitly_committed_ddl() {
        let Some(config) = test_config() else {
            return;
        };
        let ledger = table_name("degraded_ledger");
        let partial = table_name("partial");
        let backend = Arc::new(MySqlBackend::connect(&config, &ledger).await.unwrap());
        let registry = MigrationRegistry::new()
            .with(
                MigrationDefinition::new("20260101000001", "half broken").up_sql(format!(
                    "CREATE TABLE {partial} (id INT); INSERT INTO {partial}_missing VALUES (1)"
                )),
            )
            .unwrap();
        let migrator = Migrator::new(registry, backend.clone())
            .with_transaction_mode(TransactionMode::PerMigration);

        assert!(migrator.migrate(&CancellationToken::new()).await.is_err());

        assert!(table_exists(&backend, &partial).await);
        assert!(backend.ledger().await.unwrap().is_empty());

        backend.exec(&format!("DROP TABLE {partial}")).await.unwrap();
        backend.exec(&format!("DROP TABLE {ledger}")).await.unwrap();
        backend.close().await;
    }
}
