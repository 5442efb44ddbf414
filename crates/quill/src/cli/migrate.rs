use std::sync::Arc;

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quill_core::config::redact;
use quill_core::{Dialect, MigrationStatus};
use quill_runtime::migrations::{
    connect_backend, registry_from_config, MigrationBackend, MigrationRegistry,
};
use quill_runtime::testing::MemoryBackend;
use quill_runtime::Migrator;

use super::setup::{init_tracing, GlobalArgs};

/// What to do once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateAction {
    Migrate,
    Rollback,
    Status { json: bool },
    Reset,
    Fresh,
}

/// Load configuration, connect, run `action` and close the connection.
pub async fn run(action: MigrateAction, args: &GlobalArgs) -> Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    let config = args.load_config()?;
    init_tracing(&config.logging);

    let dialect = config.database.dialect()?;
    let registry = registry_from_config(&config, dialect)?;
    debug!(
        "Registered {} migrations from builtin={} and {}",
        registry.len(),
        config.migrations.builtin,
        config.migrations.dir.display()
    );

    if args.dry_run {
        return dry_run(action, registry, dialect).await;
    }

    info!(
        "Connecting to {}",
        redact(&config.database.connection_url()?)
    );
    let backend = connect_backend(&config).await?;
    let migrator =
        Migrator::new(registry, Arc::clone(&backend)).with_config(&config.migrations);

    let cancel = CancellationToken::new();
    let signal = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let result = execute(action, &migrator, &cancel).await;

    signal.abort();
    close(backend).await;
    result
}

/// Render the statements `action` would run from an empty ledger.
async fn dry_run(
    action: MigrateAction,
    registry: MigrationRegistry,
    dialect: Dialect,
) -> Result<()> {
    let backend = Arc::new(MemoryBackend::new(dialect));
    let migrator = Migrator::new(registry, backend.clone());
    execute(action, &migrator, &CancellationToken::new()).await?;

    for statement in backend.executed() {
        println!("{};\n", statement);
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, cancelling");
        cancel.cancel();
    }
}

async fn close(backend: Arc<dyn MigrationBackend>) {
    backend.close().await;
    debug!("Database connection closed");
}

async fn execute(
    action: MigrateAction,
    migrator: &Migrator,
    cancel: &CancellationToken,
) -> Result<()> {
    if let MigrateAction::Status { json: true } = action {
        let status = migrator.status(cancel).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {}  {} Migrations ({})",
        style("🪶").bold(),
        style("QUILL").bold().cyan(),
        migrator.dialect()
    );
    println!();

    match action {
        MigrateAction::Migrate => {
            println!("  {} Running pending migrations...", style("→").dim());
            let applied = migrator.migrate(cancel).await?;
            report(&applied, "Applied", "No pending migrations");
        }

        MigrateAction::Rollback => {
            println!("  {} Rolling back last batch...", style("→").dim());
            let reverted = migrator.rollback(cancel).await?;
            report(&reverted, "Rolled back", "No migrations to rollback");
        }

        MigrateAction::Reset => {
            println!("  {} Rolling back all migrations...", style("→").dim());
            let reverted = migrator.reset(cancel).await?;
            report(&reverted, "Rolled back", "No migrations to rollback");
        }

        MigrateAction::Fresh => {
            println!(
                "  {} Rolling back all migrations and re-running...",
                style("→").dim()
            );
            let applied = migrator.fresh(cancel).await?;
            report(&applied, "Applied", "No migrations found");
        }

        MigrateAction::Status { .. } => {
            let status = migrator.status(cancel).await?;
            print_status(&status);
        }
    }

    println!();
    Ok(())
}

fn report(versions: &[String], verb: &str, empty: &str) {
    if versions.is_empty() {
        println!("  {} {}", style("ℹ").blue(), empty);
        return;
    }

    for version in versions {
        println!("  {} {}: {}", style("✓").green(), verb, style(version).cyan());
    }
    println!();
    println!(
        "  {} {} {} migration(s)",
        style("✓").green(),
        verb,
        versions.len()
    );
}

fn print_status(status: &[MigrationStatus]) {
    if status.is_empty() {
        println!("  {} No migrations found", style("ℹ").blue());
        return;
    }

    println!("  Migration status:");
    for line in status.iter().map(status_line) {
        println!("    {}", line);
    }

    let applied = status.iter().filter(|s| s.applied).count();
    println!();
    println!(
        "  {} {} applied, {} pending",
        style("ℹ").blue(),
        applied,
        status.len() - applied
    );
}

fn status_line(status: &MigrationStatus) -> String {
    let state = match (status.applied, status.batch) {
        (true, Some(batch)) => style(format!("✅ Applied (batch {})", batch))
            .green()
            .to_string(),
        (true, None) => style("✅ Applied".to_string()).green().to_string(),
        (false, _) => style("⏳ Pending".to_string()).yellow().to_string(),
    };
    format!("{} - {} - {}", status.version, status.description, state)
}
