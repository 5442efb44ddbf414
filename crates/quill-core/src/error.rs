use std::fmt;

use thiserror::Error;

/// Direction a migration procedure runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Up,
    Down,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Core error type for quill operations.
#[derive(Error, Debug)]
pub enum QuillError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Duplicate migration version registered: {version}")]
    RegistrationConflict { version: String },

    #[error("Migration {version} failed during {phase}: {message}")]
    Execution {
        version: String,
        phase: Phase,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger references unregistered migration(s): {}", versions.join(", "))]
    LedgerCorruption { versions: Vec<String> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl QuillError {
    /// Wrap a failure from a migration procedure with its version and phase.
    pub fn execution(version: impl Into<String>, phase: Phase, err: impl fmt::Display) -> Self {
        Self::Execution {
            version: version.into(),
            phase,
            message: err.to_string(),
        }
    }
}

/// Result type alias using QuillError.
pub type Result<T> = std::result::Result<T, QuillError>;
