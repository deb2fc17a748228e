mod confirm;
mod scaffold;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use strata_config::{AppConfig, ConfigLoader};
use strata_db::{BatchResult, MigrationEvent, Migrator, MigratorOptions, SqlDirectorySource, TableNames};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Batch-oriented, lock-guarded schema migrations for SQLite")]
#[command(version)]
struct Cli {
    /// Config file (default: strata.yml, strata.yaml or strata.toml in the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides database.path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Migrations directory, overrides migrations.directory
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Log format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending migration as a new batch
    Apply,

    /// Roll back the most recent batch
    Rollback,

    /// Show the current batch, pending count and applied migrations
    Status,

    /// Show what the next apply would run
    Plan,

    /// Clear a migration lock left behind by a crashed run
    Unlock {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Create a new, empty migration file
    New {
        /// Short description, used in the file name
        description: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("strata=info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let json = cli.json;

    if let Commands::New { description } = &cli.command {
        let path = scaffold::create(&config.migrations.directory, description)?;
        if json {
            println!("{}", json!({ "created": path }));
        } else {
            println!("Created {}", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let options = MigratorOptions {
        tables: TableNames::new(
            &config.migrations.ledger_table,
            &config.migrations.lock_table,
        )?,
        busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
    };
    let source = SqlDirectorySource::new(&config.migrations.directory);
    let migrator = Arc::new(
        Migrator::open(&config.database.path, source, options)
            .with_context(|| format!("cannot open {}", config.database.path.display()))?,
    );

    let events = tokio::spawn(log_events(migrator.subscribe()));

    let command = cli.command;
    let worker = Arc::clone(&migrator);
    let outcome = tokio::task::spawn_blocking(move || execute(&worker, command, json))
        .await
        .context("migration task panicked")?;

    // The event task ends once the last sender is gone.
    drop(migrator);
    if let Err(e) = events.await {
        warn!("event logger stopped: {e}");
    }

    outcome
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_file(path),
        None => ConfigLoader::new("."),
    };
    let mut config = loader.load()?;

    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    if let Some(dir) = &cli.dir {
        config.migrations.directory = dir.clone();
    }
    Ok(config)
}

fn execute(migrator: &Migrator, command: Commands, json: bool) -> Result<ExitCode> {
    match command {
        Commands::Apply => Ok(report_batch(migrator.apply(), "Applied", json)),
        Commands::Rollback => Ok(report_batch(migrator.rollback(), "Rolled back", json)),
        Commands::Status => {
            let status = migrator.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Current batch: {}", status.current_batch);
                println!("Pending:       {}", status.pending);
                if !status.applied.is_empty() {
                    println!();
                    for row in &status.applied {
                        println!(
                            "  [{:>3}] {}  {}",
                            row.batch,
                            row.name,
                            row.executed_at.to_rfc3339()
                        );
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan => {
            let plan = migrator.plan()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else if plan.pending_migrations.is_empty() {
                println!("Nothing to apply.");
            } else {
                println!("Batch {} would apply:", plan.next_batch);
                for name in &plan.pending_migrations {
                    println!("  {name}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Unlock { yes } => {
            if !yes && !confirm::confirm_unlock(migrator.tables().lock())? {
                println!("Aborted.");
                return Ok(ExitCode::SUCCESS);
            }
            let was_locked = migrator.force_unlock()?;
            if json {
                println!("{}", json!({ "was_locked": was_locked }));
            } else if was_locked {
                println!("Migration lock released.");
            } else {
                println!("Migration lock was not held.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::New { .. } => unreachable!("handled before opening the database"),
    }
}

fn report_batch(result: BatchResult, verb: &str, json: bool) -> ExitCode {
    if json {
        println!(
            "{}",
            json!({
                "success": result.success,
                "migrations": result.applied_migrations,
                "error": result.error.as_ref().map(ToString::to_string),
            })
        );
    } else if let Some(error) = &result.error {
        eprintln!("error: {error}");
    } else if result.applied_migrations.is_empty() {
        println!("Nothing to do.");
    } else {
        println!("{verb} {} migration(s):", result.applied_migrations.len());
        for name in &result.applied_migrations {
            println!("  {name}");
        }
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn log_events(mut rx: mpsc::UnboundedReceiver<MigrationEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            MigrationEvent::Applied { name, batch } => info!("applied {name} (batch {batch})"),
            MigrationEvent::RolledBack { name, batch } => {
                info!("rolled back {name} (batch {batch})")
            }
        }
    }
}
