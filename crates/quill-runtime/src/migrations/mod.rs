//! Dual-dialect schema migrations.

mod backend;
mod builtin;
mod definition;
mod loader;
mod migrator;
mod mysql;
mod postgres;
mod registry;
mod sql;

use std::sync::Arc;

use quill_core::config::QuillConfig;
use quill_core::error::Result;
use quill_core::Dialect;

pub use backend::{BackendFuture, LedgerChange, MigrationBackend};
pub use builtin::builtin_migrations;
pub use definition::{MigrationDefinition, SqlProcedure};
pub use loader::load_migrations_from_dir;
pub use migrator::Migrator;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use registry::MigrationRegistry;
pub use sql::split_sql_statements;

/// Open the backend matching the configured dialect.
pub async fn connect_backend(config: &QuillConfig) -> Result<Arc<dyn MigrationBackend>> {
    let table = config.migrations.table.clone();
    Ok(match config.database.dialect()? {
        Dialect::Postgres => Arc::new(PostgresBackend::connect(&config.database, table).await?),
        Dialect::MySql => Arc::new(MySqlBackend::connect(&config.database, table).await?),
    })
}

/// Build the registry for `dialect`: built-in schema first (when enabled),
/// then the files under the configured migrations directory.
pub fn registry_from_config(config: &QuillConfig, dialect: Dialect) -> Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    if config.migrations.builtin {
        registry.extend(builtin_migrations())?;
    }
    registry.extend(load_migrations_from_dir(&config.migrations.dir, dialect)?)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_registry_combines_builtin_and_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20260114000001_add_tags.up.sql"), "CREATE TABLE tags (id INT);")
            .unwrap();

        let mut config = QuillConfig::default();
        config.migrations.dir = dir.path().to_path_buf();

        let registry = registry_from_config(&config, Dialect::Postgres).unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.contains("20260114000001"));

        config.migrations.builtin = false;
        let registry = registry_from_config(&config, Dialect::Postgres).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_file_migration_clashing_with_builtin_conflicts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("20260113000001_users.up.sql"), "SELECT 1;").unwrap();

        let mut config = QuillConfig::default();
        config.migrations.dir = dir.path().to_path_buf();

        let err = registry_from_config(&config, Dialect::MySql).unwrap_err();
        assert!(matches!(
            err,
            quill_core::QuillError::RegistrationConflict { .. }
        ));
    }
}
