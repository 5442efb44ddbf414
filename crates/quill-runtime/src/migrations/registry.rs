use std::collections::BTreeMap;

use quill_core::error::{QuillError, Result};

use super::definition::MigrationDefinition;

/// The set of migrations known to one migrator.
///
/// Built explicitly and handed to the [`Migrator`](super::Migrator); there is
/// no process-wide registry. Versions are kept in ascending order.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    definitions: BTreeMap<String, MigrationDefinition>,
}

impl MigrationRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Fails if its version is blank or already taken.
    pub fn register(&mut self, definition: MigrationDefinition) -> Result<()> {
        if definition.version().trim().is_empty() {
            return Err(QuillError::InvalidArgument(format!(
                "Migration '{}' has an empty version",
                definition.description()
            )));
        }
        if self.definitions.contains_key(definition.version()) {
            return Err(QuillError::RegistrationConflict {
                version: definition.version().to_string(),
            });
        }
        self.definitions
            .insert(definition.version().to_string(), definition);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, definition: MigrationDefinition) -> Result<Self> {
        self.register(definition)?;
        Ok(self)
    }

    /// Register every definition, stopping at the first conflict.
    pub fn extend(&mut self, definitions: impl IntoIterator<Item = MigrationDefinition>) -> Result<()> {
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(())
    }

    /// All definitions in ascending version order.
    pub fn all(&self) -> impl DoubleEndedIterator<Item = &MigrationDefinition> + '_ {
        self.definitions.values()
    }

    pub fn get(&self, version: &str) -> Option<&MigrationDefinition> {
        self.definitions.get(version)
    }

    pub fn contains(&self, version: &str) -> bool {
        self.definitions.contains_key(version)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
