//! File-based migrations.
//!
//! Migrations are named like:
//! - `20260114000001_add_tags.up.sql`
//! - `20260114000001_add_tags.down.sql`
//!
//! The part before the first `_` is the version, the rest is the
//! description. A plain `<name>.sql` file is an up migration with no down.
//! Files in a subdirectory named after the dialect (`postgres/`, `mysql/`)
//! replace same-version files from the directory itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use quill_core::error::{QuillError, Result};
use quill_core::Dialect;

use super::definition::MigrationDefinition;

#[derive(Debug, Default)]
struct MigrationFiles {
    description: String,
    up: Option<PathBuf>,
    down: Option<PathBuf>,
}

enum Direction {
    Up,
    Down,
}

/// Load the migrations available for `dialect` from a directory.
///
/// A missing directory yields no migrations.
pub fn load_migrations_from_dir(dir: &Path, dialect: Dialect) -> Result<Vec<MigrationDefinition>> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut files = collect(dir)?;
    let dialect_dir = dir.join(dialect.as_str());
    if dialect_dir.is_dir() {
        files.extend(collect(&dialect_dir)?);
    }

    let mut migrations = Vec::with_capacity(files.len());
    for (version, entry) in files {
        let up = entry.up.ok_or_else(|| {
            QuillError::Config(format!(
                "Migration {} has a down file but no up file",
                version
            ))
        })?;

        let mut migration = MigrationDefinition::new(version, entry.description)
            .up_sql(std::fs::read_to_string(&up)?);
        if let Some(down) = entry.down {
            migration = migration.down_sql(std::fs::read_to_string(&down)?);
        }
        migrations.push(migration);
    }

    debug!("Loaded {} file migrations for {}", migrations.len(), dialect);
    Ok(migrations)
}

fn collect(dir: &Path) -> Result<BTreeMap<String, MigrationFiles>> {
    let mut files: BTreeMap<String, MigrationFiles> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((stem, direction)) = classify(file_name) else {
            continue;
        };

        let (version, description) = match stem.split_once('_') {
            Some((version, rest)) => (version, rest.replace('_', " ")),
            None => (stem, String::new()),
        };
        if version.is_empty() {
            return Err(QuillError::Config(format!(
                "Invalid migration filename: {}",
                file_name
            )));
        }

        let slot = files.entry(version.to_string()).or_default();
        let target = match direction {
            Direction::Up => &mut slot.up,
            Direction::Down => &mut slot.down,
        };
        if target.is_some() {
            return Err(QuillError::RegistrationConflict {
                version: version.to_string(),
            });
        }
        *target = Some(path.clone());
        if slot.description.is_empty() {
            slot.description = description;
        }
    }

    Ok(files)
}

fn classify(file_name: &str) -> Option<(&str, Direction)> {
    if let Some(stem) = file_name.strip_suffix(".down.sql") {
        Some((stem, Direction::Down))
    } else if let Some(stem) = file_name.strip_suffix(".up.sql") {
        Some((stem, Direction::Up))
    } else {
        file_name
            .strip_suffix(".sql")
            .map(|stem| (stem, Direction::Up))
    }
}
