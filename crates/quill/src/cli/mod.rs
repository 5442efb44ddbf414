mod migrate;
mod setup;

pub use migrate::MigrateAction;
pub use setup::GlobalArgs;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// QUILL - Database migrations for PostgreSQL and MySQL
#[derive(Parser)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Apply all pending migrations as one batch.
    #[command(visible_alias = "up")]
    Migrate,

    /// Revert the most recent batch.
    #[command(visible_alias = "down")]
    Rollback,

    /// Show applied and pending migrations.
    Status {
        /// Print the status as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Revert every applied migration.
    Reset,

    /// Revert everything, then apply all migrations.
    Fresh,
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let action = match self.command {
            Commands::Migrate => MigrateAction::Migrate,
            Commands::Rollback => MigrateAction::Rollback,
            Commands::Status { json } => MigrateAction::Status { json },
            Commands::Reset => MigrateAction::Reset,
            Commands::Fresh => MigrateAction::Fresh,
        };
        migrate::run(action, &self.global).await
    }
}
