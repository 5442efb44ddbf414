//! Runtime for the quill migration engine: database pools, PostgreSQL and
//! MySQL backends, the migration registry and the [`Migrator`].

pub mod db;
pub mod migrations;
pub mod testing;

pub use db::Database;
pub use migrations::{
    builtin_migrations, connect_backend, load_migrations_from_dir, registry_from_config,
    MigrationBackend, MigrationDefinition, MigrationRegistry, Migrator,
};
